#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod annotator;
pub mod consensus;
pub mod majority;
pub mod rank;
pub mod report;
pub mod reshape;
pub mod types;
pub mod validate;
