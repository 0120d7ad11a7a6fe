/// Output level restored when focus comes back.
pub const FULL_OUTPUT_LEVEL: f32 = 1.0;
/// Attenuated level used while another application holds transient focus
/// but allows ducked playback.
pub const DUCKED_OUTPUT_LEVEL: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusGrant {
    Granted,
    Denied,
}

/// Asynchronous focus notifications. These arrive on a channel drained by
/// the app loop, never re-entrantly from inside a player command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusChange {
    Gained,
    Lost,
    LostTransient,
    LostTransientCanDuck,
}

/// Mediates exclusive use of the shared audio output device among competing
/// applications. Requesting is synchronous; revocations arrive later as
/// [`FocusChange`] values.
pub trait FocusArbiter {
    fn request_exclusive(&mut self) -> FocusGrant;
}

/// Arbiter for hosts without a system-wide focus broker: every request is
/// granted and focus is never revoked.
pub struct UncontestedArbiter;

impl FocusArbiter for UncontestedArbiter {
    fn request_exclusive(&mut self) -> FocusGrant {
        FocusGrant::Granted
    }
}
