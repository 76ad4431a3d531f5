use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{application::CommandOptionType, id::GuildId},
    prelude::Context,
};

fn all_commands() -> Vec<CreateCommand> {
    vec![
        narrar_command(),
        status_command(),
        stats_command(),
        limpiar_command(),
        salir_command(),
        metrics_command(),
    ]
}

/// Registra comandos globales
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    for command in all_commands() {
        ctx.http.create_global_command(&command).await?;
    }

    Ok(())
}

/// Registra comandos para una guild específica (desarrollo)
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands()).await?;

    Ok(())
}

fn narrar_command() -> CreateCommand {
    CreateCommand::new("narrar")
        .description("Narra un texto en inglés")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "texto", "Texto a narrar")
                .required(true)
                .max_length(1000),
        )
}

fn status_command() -> CreateCommand {
    CreateCommand::new("status").description("Muestra el estado del bot")
}

fn stats_command() -> CreateCommand {
    CreateCommand::new("stats").description("Muestra estadísticas de uso")
}

fn limpiar_command() -> CreateCommand {
    CreateCommand::new("limpiar").description("Limpia la cola de reproducción")
}

fn salir_command() -> CreateCommand {
    CreateCommand::new("salir").description("Desconecta el bot del canal de voz")
}

fn metrics_command() -> CreateCommand {
    CreateCommand::new("metrics")
        .description("Muestra métricas del bot")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "tipo", "Tipo de métricas a mostrar")
                .required(false)
                .add_string_choice("general", "general")
                .add_string_choice("voz", "voice")
                .add_string_choice("audio", "audio"),
        )
}
