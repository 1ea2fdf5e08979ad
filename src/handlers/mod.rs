pub mod fellowship;
pub mod health;
pub mod status;
