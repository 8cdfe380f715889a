pub mod error;
pub mod types;

pub use error::{KernbenchError, Result};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(PROVENANCE, "provenance");
    }
}
