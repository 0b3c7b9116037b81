//! Crate-level configuration and defaults.

use std::env;

/// The well-known bus name a [`crate::context::Context`] watches by default.
pub const DEFAULT_BUS_NAME: &str = "org.pinos";

/// Environment variable that overrides [`DEFAULT_BUS_NAME`].
pub const BUS_NAME_ENV_VAR: &str = "PINOS_BUS_NAME";

/// Resolve the bus name to watch: `PINOS_BUS_NAME` if set, otherwise
/// [`DEFAULT_BUS_NAME`].
#[must_use]
pub fn bus_name() -> String {
    env::var(BUS_NAME_ENV_VAR).unwrap_or_else(|_| DEFAULT_BUS_NAME.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_well_known_name_when_unset() {
        // Safe to assert the default in isolation; tests that care about the
        // override set and restore the var themselves within their own scope.
        if env::var(BUS_NAME_ENV_VAR).is_err() {
            assert_eq!(bus_name(), DEFAULT_BUS_NAME);
        }
    }
}
