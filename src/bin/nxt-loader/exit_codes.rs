pub const EXIT_OK: i32 = 0;
pub const EXIT_NO_DEVICE: i32 = 10;
pub const EXIT_INVALID_IMAGE: i32 = 11;
pub const EXIT_WRITE_FAILED: i32 = 12;
pub const EXIT_AMBIGUOUS: i32 = 13;
pub const EXIT_UNEXPECTED: i32 = 20;
