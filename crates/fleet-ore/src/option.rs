//! Extension traits for [`Option`].

/// Extension methods for [`Option`] used throughout fleetd for rendering
/// optional values in error messages and logs.
pub trait OptionExt<T> {
    /// Renders the option, substituting `display` for `None`.
    fn display_or<'a>(&'a self, display: &'a str) -> &'a str
    where
        T: AsRef<str>;
}

impl<T> OptionExt<T> for Option<T> {
    fn display_or<'a>(&'a self, display: &'a str) -> &'a str
    where
        T: AsRef<str>,
    {
        match self {
            Some(v) => v.as_ref(),
            None => display,
        }
    }
}
