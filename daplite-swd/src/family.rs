// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Target family hooks
//!
//! Vendor families differ in how targets are unlocked, reset and secured.
//! [`FamilyOps`] is the extension seam: the connection state machine and
//! [`crate::TargetController`] call these hooks at defined points, and a
//! family implementation overrides only what it needs.  Every hook has a
//! default suitable for a standard Cortex-M target.

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::SwdError;
use crate::interface::SwdInterface;
use crate::target::TargetState;
use crate::transport::SwdTransport;

/// Family-specific operations, called from the connection state machine and
/// the target controller.
///
/// All hooks receive the interface so they can perform arbitrary register
/// and memory operations.  The default implementations are no-ops (or the
/// generic behaviour), so a family only overrides the points where its
/// silicon deviates.
pub trait FamilyOps<T: SwdTransport> {
    /// Called at the start of every connection attempt, before any wire
    /// traffic.  Use for families that need special pin or clock handling
    /// ahead of the switch sequence.
    fn before_connect(&mut self, _iface: &mut SwdInterface<T>) -> Result<(), SwdError> {
        Ok(())
    }

    /// Called once the debug domain is powered, at the end of a successful
    /// connection.  Use for families whose debug access is gated behind a
    /// vendor unlock (key registers, challenge/response, etc).
    fn unlock_sequence(&mut self, _iface: &mut SwdInterface<T>) -> Result<(), SwdError> {
        Ok(())
    }

    /// Whether the target's flash security is active.  Secured parts
    /// typically refuse memory access until mass-erased.
    fn security_bits_set(&mut self, _iface: &mut SwdInterface<T>) -> Result<bool, SwdError> {
        Ok(false)
    }

    /// Optionally overrides a target state transition.
    ///
    /// Returns:
    /// - `Ok(true)`: the family handled the transition completely.
    /// - `Ok(false)`: use the generic Cortex-M sequence.
    /// - `Err(SwdError)`: the transition failed.
    fn set_state(
        &mut self,
        _iface: &mut SwdInterface<T>,
        _state: TargetState,
    ) -> Result<bool, SwdError> {
        Ok(false)
    }

    /// Drives the target's hardware reset line.  Families with a reset
    /// supervisor or an active-high reset can override.
    fn set_target_reset(
        &mut self,
        iface: &mut SwdInterface<T>,
        asserted: bool,
    ) -> Result<(), SwdError> {
        iface.set_nreset(asserted);
        Ok(())
    }

    /// Validates an image before it is programmed.  Use for families with
    /// mandatory vector table checksums or image headers.
    fn validate_image(&mut self, _address: u32, _data: &[u8]) -> Result<(), SwdError> {
        Ok(())
    }

    /// Called for a `PowerOn` state request.  Most probes do not control
    /// target power, so the default is a no-op.
    fn power_on(&mut self, _iface: &mut SwdInterface<T>) -> Result<(), SwdError> {
        Ok(())
    }

    /// Called for a `Shutdown` state request.  Most probes do not control
    /// target power, so the default is a no-op.
    fn shutdown(&mut self, _iface: &mut SwdInterface<T>) -> Result<(), SwdError> {
        Ok(())
    }
}

/// Family implementation for standard Cortex-M targets with no vendor
/// quirks.  Every hook uses its default.
#[derive(Debug, Default, Clone, Copy)]
pub struct GenericFamily;

impl<T: SwdTransport> FamilyOps<T> for GenericFamily {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeTarget;

    // Control register and key of an invented secured part, where writing
    // the key mass-erases the device and lifts flash security
    const MASS_ERASE_REG: u32 = 0x4004_8000;
    const MASS_ERASE_KEY: u32 = 0x4D45_5253;

    #[derive(Debug, Default)]
    struct SecuredFamily {
        secured: bool,
        unlocks: u32,
    }

    impl<T: SwdTransport> FamilyOps<T> for SecuredFamily {
        fn security_bits_set(&mut self, _iface: &mut SwdInterface<T>) -> Result<bool, SwdError> {
            Ok(self.secured)
        }

        fn unlock_sequence(&mut self, iface: &mut SwdInterface<T>) -> Result<(), SwdError> {
            if self.security_bits_set(iface)? {
                iface.write_mem(MASS_ERASE_REG, MASS_ERASE_KEY)?;
                self.secured = false;
                self.unlocks += 1;
            }
            Ok(())
        }
    }

    #[test]
    fn secured_target_unlocked_during_connect() {
        let mut family = SecuredFamily {
            secured: true,
            unlocks: 0,
        };

        let mut iface = SwdInterface::new(FakeTarget::new());
        iface.connect(&mut family).unwrap();

        assert_eq!(family.unlocks, 1);
        assert!(!family.secured);
        assert_eq!(iface.read_mem(MASS_ERASE_REG).unwrap(), MASS_ERASE_KEY);

        // Already unsecured - a reconnect does not erase again
        iface.disconnect();
        iface.connect(&mut family).unwrap();
        assert_eq!(family.unlocks, 1);
    }

    #[test]
    fn failed_unlock_fails_the_connection() {
        #[derive(Debug)]
        struct RefusingFamily;

        impl<T: SwdTransport> FamilyOps<T> for RefusingFamily {
            fn unlock_sequence(&mut self, _iface: &mut SwdInterface<T>) -> Result<(), SwdError> {
                Err(SwdError::NotReady)
            }
        }

        let mut iface = SwdInterface::new(FakeTarget::new());
        let result = iface.connect(&mut RefusingFamily);
        assert_eq!(result, Err(SwdError::ConnectFailed));
        assert!(!iface.is_connected());
    }
}
