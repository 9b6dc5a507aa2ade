pub mod view;

pub use view::{Entry, LocalView, Reconciled};
