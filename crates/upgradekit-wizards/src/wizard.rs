use upgradekit_common::Result;

/// A named, idempotent unit of one-time data migration.
///
/// The runner persists which identifiers have been executed, so an
/// identifier must never change once shipped. Implementations must leave
/// `is_necessary` returning `false` after a successful `execute`, which makes
/// repeated execution a no-op.
pub trait UpgradeWizard: Send + Sync {
    fn identifier(&self) -> &'static str;

    fn title(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Identifiers of the [`Prerequisite`]s that must hold before this wizard
    /// runs, in the order they should be ensured.
    fn prerequisites(&self) -> Vec<&'static str>;

    /// Read-only check whether any data still needs migrating.
    fn is_necessary(&self) -> Result<bool>;

    /// Perform the migration. Store faults are returned as errors.
    fn execute(&self) -> Result<bool>;
}

/// A condition an [`UpgradeWizard`] depends on, such as an up-to-date schema.
pub trait Prerequisite: Send + Sync {
    fn identifier(&self) -> &'static str;

    fn title(&self) -> &'static str;

    fn is_fulfilled(&self) -> Result<bool>;

    /// Try to fulfil the prerequisite. Returns whether it holds afterwards.
    fn ensure(&self) -> Result<bool>;
}
