/// A field update for `copy_with`.
///
/// `Unchanged` keeps the current value. For nullable fields,
/// `Set(None)` explicitly clears the value, which is distinct from leaving it
/// as is.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Patch<T> {
    #[default]
    Unchanged,
    Set(T),
}

impl<T> Patch<T> {
    /// The new value, or `current` when unchanged.
    pub fn apply(self, current: T) -> T {
        match self {
            Self::Unchanged => current,
            Self::Set(value) => value,
        }
    }

    /// Like [`Patch::apply`], computing the current value only when needed.
    pub(crate) fn apply_with(self, current: impl FnOnce() -> T) -> T {
        match self {
            Self::Unchanged => current(),
            Self::Set(value) => value,
        }
    }

    pub fn is_set(&self) -> bool {
        matches!(self, Self::Set(_))
    }

    pub fn as_set(&self) -> Option<&T> {
        match self {
            Self::Unchanged => None,
            Self::Set(value) => Some(value),
        }
    }
}

impl<T> From<T> for Patch<T> {
    fn from(value: T) -> Self {
        Self::Set(value)
    }
}
