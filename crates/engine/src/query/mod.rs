//! Analytical questions answered by a generated read-only graph query.
//!
//! - [`validator`]: read-only verdict for a query string
//! - [`planner`]: model proposal, validation, repair loop, execution
//! - [`present`]: rows to answer text
//! - [`table`]: markdown table rendering
//! - [`schema`]: schema hint and prompts

pub mod planner;
pub mod present;
pub mod schema;
pub mod table;
pub mod validator;

pub use planner::{PlanOutcome, QueryPlan, QueryPlanner};
pub use present::present_rows;
pub use validator::{Verdict, normalize, validate};
