//! Page sequencing for whole firmware images.
//!
//! Splits an image into ascending 256-byte pages and pushes them through a
//! [`SambaSession`], clipping the final page to the remaining bytes. Lock
//! bits are the caller's business, and nothing here reads back what was
//! written; verification layers on [`read_pages`].

use tracing::debug;

use crate::nxt;
use crate::samba::{FlashHelper, SambaError, SambaSession};
use crate::transport::RawTransport;

/// Progress of one page write within an image.
#[derive(Debug, Clone, Copy)]
pub struct PageWrite {
    pub index: usize,
    pub total: usize,
    pub page: u32,
}

/// Writes `data` to successive pages starting at `first_page`, returning
/// the number of pages written.
pub fn write_pages<T, F>(
    session: &mut SambaSession<T>,
    helper: &FlashHelper,
    first_page: u32,
    data: &[u8],
    mut on_page: F,
) -> Result<u32, SambaError>
where
    T: RawTransport,
    F: FnMut(PageWrite),
{
    let total = data.len().div_ceil(nxt::PAGE_SIZE);
    if first_page as usize + total > nxt::PAGE_COUNT as usize {
        return Err(SambaError::PageOutOfRange {
            page: first_page + total as u32 - 1,
        });
    }

    debug!(first_page, pages = total, bytes = data.len(), "writing image");

    let mut page = first_page;
    for (index, chunk) in data.chunks(nxt::PAGE_SIZE).enumerate() {
        on_page(PageWrite { index, total, page });
        session.write_page(helper, page, chunk)?;
        page += 1;
    }
    Ok(total as u32)
}

/// Reads `pages` successive pages starting at `first_page`.
pub fn read_pages<T: RawTransport>(
    session: &mut SambaSession<T>,
    first_page: u32,
    pages: u32,
) -> Result<Vec<u8>, SambaError> {
    let end = first_page.checked_add(pages);
    if end.is_none() || end > Some(nxt::PAGE_COUNT) {
        return Err(SambaError::PageOutOfRange {
            page: first_page.saturating_add(pages.saturating_sub(1)),
        });
    }

    let mut out = Vec::with_capacity(pages as usize * nxt::PAGE_SIZE);
    for page in first_page..first_page + pages {
        out.extend(session.read_page(page)?);
    }
    Ok(out)
}
