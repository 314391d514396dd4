/// Errors reported by the AT engine.
///
/// The engine keeps the first error raised during a command cycle (the
/// "sticky" error) until it is cleared or a new cycle is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    Unknown,
    /// The engine was shut down with `deinit`.
    NotInitialised,
    /// An argument exceeded a fixed capacity or was otherwise unusable.
    InvalidParameter,
    /// A fixed-capacity table or queue is full.
    OutOfMemory,
    /// The module did not produce what the protocol expected: a timeout, a
    /// failed read or write, or an explicit `ERROR` / `+CME ERROR` /
    /// `+CMS ERROR` response.
    DeviceError,
}

/// Kind of error response reported by the module.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceErrorType {
    /// No code was reported (including a plain `ERROR`).
    #[default]
    NoError,
    /// `+CMS ERROR: <code>`
    Cms,
    /// `+CME ERROR: <code>`
    Cme,
}

/// The last error code reported by the module.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceError {
    pub err_type: DeviceErrorType,
    pub code: i32,
}

/// u-blox specific error codes and their 3GPP TS 24.008 / 27.007 equivalent.
const MAP_3GPP_ERRORS: [(i32, i32); 38] = [
    (103, 3),
    (106, 6),
    (107, 7),
    (108, 8),
    (111, 11),
    (112, 12),
    (113, 13),
    (114, 14),
    (115, 15),
    (122, 22),
    (125, 25),
    (172, 95),
    (173, 96),
    (174, 97),
    (175, 99),
    (176, 111),
    (177, 8),
    (126, 26),
    (127, 27),
    (128, 28),
    (129, 29),
    (130, 30),
    (131, 31),
    (132, 32),
    (133, 33),
    (134, 34),
    (140, 40),
    (141, 41),
    (142, 42),
    (143, 43),
    (144, 44),
    (145, 45),
    (146, 46),
    (178, 65),
    (179, 66),
    (180, 48),
    (181, 83),
    (171, 49),
];

/// Translate a module error code into the 3GPP numbering.
///
/// CMS codes below 128 are already 3GPP codes. Anything else goes through
/// the fixed translation table; unknown codes have no mapping.
pub fn to_3gpp(code: i32, err_type: DeviceErrorType) -> Option<i32> {
    if err_type == DeviceErrorType::Cms && (0..128).contains(&code) {
        return Some(code);
    }

    MAP_3GPP_ERRORS
        .iter()
        .find(|(vendor, _)| *vendor == code)
        .map(|&(_, mapped)| mapped)
}
