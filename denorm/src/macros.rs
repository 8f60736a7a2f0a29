//! `merge_error!` and `bail!`, the shorthand every merge module uses to fail with a
//! [`crate::error::MergeError`].

/// Creates a [`crate::error::MergeError`] from an error kind and a static description.
///
/// The description names what failed ("Merge spec is malformed"); the offending input goes in
/// the detail, given positionally (formatted with `to_string`) or with `detail =` to move an
/// owned [`String`]. Store and write errors keep their cause with `source:`.
///
/// ```
/// use denorm::{ErrorKind, merge_error};
///
/// let spec = "pet:[pet.owner";
/// let err = merge_error!(ErrorKind::InvalidSpec, "Merge spec is malformed", spec);
/// assert_eq!(err.kind(), ErrorKind::InvalidSpec);
/// ```
#[macro_export]
macro_rules! merge_error {
    ($kind:expr, $desc:expr) => {
        $crate::error::MergeError::from(($kind, $desc))
    };
    ($kind:expr, $desc:expr, source: $source:expr) => {
        $crate::error::MergeError::from(($kind, $desc)).with_source($source)
    };
    ($kind:expr, $desc:expr, detail = $detail:expr) => {
        $crate::error::MergeError::from(($kind, $desc, $detail))
    };
    ($kind:expr, $desc:expr, detail = $detail:expr, source: $source:expr) => {
        $crate::error::MergeError::from(($kind, $desc, $detail)).with_source($source)
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        $crate::error::MergeError::from(($kind, $desc, $detail.to_string()))
    };
    ($kind:expr, $desc:expr, $detail:expr, source: $source:expr) => {
        $crate::error::MergeError::from(($kind, $desc, $detail.to_string())).with_source($source)
    };
}

/// Returns early with a [`crate::error::MergeError`] built like [`merge_error!`].
///
/// Used where a merge step cannot go on, e.g. a foreign key without a child under the abort
/// policy.
#[macro_export]
macro_rules! bail {
    ($kind:expr, $desc:expr) => {
        return ::core::result::Result::Err($crate::merge_error!($kind, $desc))
    };
    ($kind:expr, $desc:expr, source: $source:expr) => {
        return ::core::result::Result::Err($crate::merge_error!($kind, $desc, source: $source))
    };
    ($kind:expr, $desc:expr, detail = $detail:expr) => {
        return ::core::result::Result::Err($crate::merge_error!($kind, $desc, detail = $detail))
    };
    ($kind:expr, $desc:expr, detail = $detail:expr, source: $source:expr) => {
        return ::core::result::Result::Err($crate::merge_error!(
            $kind,
            $desc,
            detail = $detail,
            source: $source
        ))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        return ::core::result::Result::Err($crate::merge_error!($kind, $desc, $detail))
    };
    ($kind:expr, $desc:expr, $detail:expr, source: $source:expr) => {
        return ::core::result::Result::Err($crate::merge_error!(
            $kind,
            $desc,
            $detail,
            source: $source
        ))
    };
}
