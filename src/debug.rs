use std::fmt;

// Wrapper printing byte slices as strings when possible, so that record
// debug output remains readable.
pub(crate) struct Bytes<'a>(pub(crate) &'a [u8]);

impl fmt::Debug for Bytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match std::str::from_utf8(self.0) {
            Ok(string) => write!(f, "{:?}", string),
            Err(_) => write!(f, "{:?}", self.0),
        }
    }
}
