use crate::targets::Target;

/// Progress events emitted by the long-running operations in [`crate::api`].
#[derive(Debug, Clone)]
pub enum OperationEvent {
    DiscoverStart,
    TargetDetected {
        index: usize,
        target: Target,
    },
    DiscoverDone {
        count: usize,
    },
    TargetSelected {
        target_id: String,
    },

    ImageLoaded {
        bytes: usize,
        pages: u32,
    },
    HelperLoaded {
        bytes: usize,
    },

    Attached {
        target_id: String,
        version: String,
    },

    UnlockStart {
        regions: u32,
    },
    Unlocked,

    Page {
        index: usize,
        total: usize,
        page: u32,
    },

    VerifyStart {
        pages: u32,
    },
    Verified,

    Reboot,
    Done {
        target_id: String,
    },
}
