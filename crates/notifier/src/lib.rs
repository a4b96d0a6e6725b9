pub mod cooldown;
pub mod discord;
pub mod email;
pub mod escalation;
pub mod render;
pub mod sender;
pub mod telegram;
