pub mod handle;
pub mod lora;
