pub mod job;
pub mod machine_learning;
