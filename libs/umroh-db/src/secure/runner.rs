//! Sealed database runner capability.
//!
//! Repositories receive `&impl DBRunner` and never see a raw sea-orm
//! connection. Only [`DbConn`] and [`DbTx`] implement the trait, so user code
//! cannot build a runner that skips the unit-of-work binding.

use super::db::{DbConn, DbTx};

mod sealed {
    pub trait Sealed {}
}

/// Crate-only bridge to sea-orm's executor types.
pub enum SeaOrmRunner<'a> {
    Conn(&'a sea_orm::DatabaseConnection),
    Tx(&'a sea_orm::DatabaseTransaction),
}

pub trait DBRunnerInternal: sealed::Sealed + Send + Sync {
    fn as_seaorm(&self) -> SeaOrmRunner<'_>;
}

/// Capability marker for anything that can execute scoped queries.
///
/// Has no methods of its own and cannot be implemented outside this crate.
pub trait DBRunner: DBRunnerInternal {}

impl sealed::Sealed for DbConn<'_> {}
impl DBRunnerInternal for DbConn<'_> {
    fn as_seaorm(&self) -> SeaOrmRunner<'_> {
        SeaOrmRunner::Conn(self.conn)
    }
}
impl DBRunner for DbConn<'_> {}

impl sealed::Sealed for DbTx<'_> {}
impl DBRunnerInternal for DbTx<'_> {
    fn as_seaorm(&self) -> SeaOrmRunner<'_> {
        SeaOrmRunner::Tx(self.tx)
    }
}
impl DBRunner for DbTx<'_> {}

/// Run `$body` with `$c` bound to whichever sea-orm executor `$runner` wraps.
macro_rules! with_runner {
    ($runner:expr, |$c:ident| $body:expr) => {
        match $crate::secure::runner::DBRunnerInternal::as_seaorm($runner) {
            $crate::secure::runner::SeaOrmRunner::Conn($c) => $body,
            $crate::secure::runner::SeaOrmRunner::Tx($c) => $body,
        }
    };
}

pub(crate) use with_runner;
