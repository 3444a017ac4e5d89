//! Context-window enforcement for the History Store (§4.4): groups a
//! conversation's messages into tool-call-batch-aware units and trims the
//! oldest non-system units until the log fits a configured budget.

pub mod builder;
pub mod report;
pub mod truncation;

pub use builder::ContextWindow;
pub use report::TruncationReport;
