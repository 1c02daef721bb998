pub mod common;
pub mod update_plan;

pub use common::standard_labels;
pub use update_plan::{generate_update_plan, plan_id};
