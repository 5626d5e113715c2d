pub mod health;
pub mod training;
