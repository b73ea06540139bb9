pub mod call;
pub mod getpwnam;
pub mod serve;
