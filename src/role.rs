/// The local host's relationship to a replicated object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ObjectRole {
    /// Registered but inactive; not replicated in either direction.
    #[default]
    None = 0,
    /// A remote peer owns the object; the local host consumes its state.
    Replicated = 1,
    /// The local host owns the object and is the sole producer of its state.
    OwnedAuthoritative = 2,
}
