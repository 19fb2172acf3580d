pub mod journal;
pub mod list;
pub mod run;
pub mod table;
