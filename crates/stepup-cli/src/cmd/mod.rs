pub mod run;
pub mod update;
