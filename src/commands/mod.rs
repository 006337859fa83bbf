pub mod destroy;
pub mod run;
