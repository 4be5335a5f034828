pub mod bce;
