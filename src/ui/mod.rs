//! Embeds de respuesta para los comandos slash.

pub mod embeds;
