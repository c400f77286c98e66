pub mod approver;
pub mod config_cmd;
pub mod doctor;
pub mod plan;
pub mod run;
