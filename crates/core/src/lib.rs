pub mod config;
pub mod context;
pub mod error;
pub mod model;
pub mod query;

pub use config::Config;
pub use context::{Principal, PrincipalKind, RequestContext};
pub use error::CoreError;
pub use model::*;
pub use query::{CostField, CostQuery, Filter, FilterValue, Operator, Page, Sort};
