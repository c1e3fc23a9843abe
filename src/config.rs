/// Init-time choices the distilled model left implicit. A `Default` impl
/// carries the constants named in the data model and lifecycle sections;
/// tests construct non-default configs (small ring sizes) to exercise wrap
/// behavior without waiting through many real wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Driver ceiling on CONFIG.MaxSlotsEn, independent of what the
    /// controller itself reports in HCSPARAMS1.MaxSlots.
    pub max_slots_cap: u8,
    /// TRB count of the command ring, including its trailing Link-TRB.
    pub command_ring_trb_count: usize,
    /// TRB count of the (single-segment) event ring.
    pub event_ring_trb_count: usize,
    /// TRB count of a freshly allocated per-endpoint transfer ring.
    pub transfer_ring_trb_count: usize,
    /// Whether to claim the controller via the USB Legacy Support extended
    /// capability during init. Always true in production; tests that mock
    /// a controller with no such capability still call through this path,
    /// it's simply a no-op when the capability is absent.
    pub require_legacy_handoff: bool,
    /// Bounded-wait budget, in milliseconds, for CNR/HCH/HCRST polling and
    /// for command/transfer completion waits.
    pub poll_timeout_ms: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            max_slots_cap: 16,
            command_ring_trb_count: 256,
            event_ring_trb_count: 256,
            transfer_ring_trb_count: 32,
            require_legacy_handoff: true,
            poll_timeout_ms: 1000,
        }
    }
}
