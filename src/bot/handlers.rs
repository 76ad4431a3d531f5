use anyhow::Result;
use serenity::{
    builder::{
        CreateInteractionResponse, CreateInteractionResponseMessage, EditInteractionResponse,
    },
    model::application::CommandInteraction,
    prelude::Context,
};
use tracing::{error, info};

use crate::{
    audio::scheduler::SequencerPhase,
    bot::{user_facing_error, NarradorBot},
    ui::embeds::{self, MetricsKind},
};

fn string_option<'a>(command: &'a CommandInteraction, name: &str) -> Option<&'a str> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_str())
}

async fn defer(ctx: &Context, command: &CommandInteraction) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;
    Ok(())
}

async fn reply(ctx: &Context, command: &CommandInteraction, content: impl Into<String>) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new().content(content),
            ),
        )
        .await?;
    Ok(())
}

/// Maneja comandos slash
pub async fn handle_command(
    ctx: &Context,
    command: CommandInteraction,
    bot: &NarradorBot,
) -> Result<()> {
    if command.guild_id.is_none() {
        command
            .create_response(
                &ctx.http,
                CreateInteractionResponse::Message(
                    CreateInteractionResponseMessage::new()
                        .content("❌ Este comando solo funciona en un servidor")
                        .ephemeral(true),
                ),
            )
            .await?;
        return Ok(());
    }

    info!(
        "📝 Comando /{} usado por {} en guild {:?}",
        command.data.name, command.user.name, command.guild_id
    );

    match command.data.name.as_str() {
        "narrar" => handle_narrar(ctx, command, bot).await?,
        "status" => handle_status(ctx, command, bot).await?,
        "stats" => handle_stats(ctx, command, bot).await?,
        "limpiar" => handle_limpiar(ctx, command, bot).await?,
        "salir" => handle_salir(ctx, command, bot).await?,
        "metrics" => handle_metrics(ctx, command, bot).await?,
        _ => {
            command
                .create_response(
                    &ctx.http,
                    CreateInteractionResponse::Message(
                        CreateInteractionResponseMessage::new()
                            .content("❌ Comando no reconocido")
                            .ephemeral(true),
                    ),
                )
                .await?;
        }
    }

    Ok(())
}

async fn handle_narrar(ctx: &Context, command: CommandInteraction, bot: &NarradorBot) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Comando usado fuera de un servidor"))?;
    let text = string_option(&command, "texto")
        .ok_or_else(|| anyhow::anyhow!("Texto no proporcionado"))?;

    // La síntesis puede tardar más que el plazo de respuesta de Discord
    defer(ctx, &command).await?;

    let response = match bot.narrate(guild_id, command.channel_id, command.user.id, text).await {
        Ok(job) => {
            let queued = bot.registry.get(guild_id).map_or(0, |s| s.queue_len());
            EditInteractionResponse::new().content(format!(
                "✅ Texto agregado a la cola de narración (audio {}, {} en cola)",
                job, queued
            ))
        }
        Err(e) => {
            error!("Error en comando narrar: {:?}", e);
            EditInteractionResponse::new().embed(embeds::create_error_embed(&user_facing_error(&e)))
        }
    };

    command.edit_response(&ctx.http, response).await?;
    Ok(())
}

async fn handle_status(ctx: &Context, command: CommandInteraction, bot: &NarradorBot) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Comando usado fuera de un servidor"))?;

    let status = bot.registry.status(guild_id).await;
    let embed = embeds::create_status_embed(status.as_ref());

    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(CreateInteractionResponseMessage::new().embed(embed)),
        )
        .await?;
    Ok(())
}

async fn handle_stats(ctx: &Context, command: CommandInteraction, bot: &NarradorBot) -> Result<()> {
    let stats = bot.storage.lock().await.channel_stats(command.channel_id.get());
    let embed = embeds::create_stats_embed(&stats);

    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(CreateInteractionResponseMessage::new().embed(embed)),
        )
        .await?;
    Ok(())
}

async fn handle_limpiar(ctx: &Context, command: CommandInteraction, bot: &NarradorBot) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Comando usado fuera de un servidor"))?;

    let cleared = bot.registry.clear_queue(guild_id);
    reply(
        ctx,
        &command,
        format!("🧹 Cola de reproducción limpiada ({} audios removidos)", cleared),
    )
    .await
}

async fn handle_salir(ctx: &Context, command: CommandInteraction, bot: &NarradorBot) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Comando usado fuera de un servidor"))?;

    let active = bot
        .registry
        .status(guild_id)
        .await
        .is_some_and(|s| s.connected || s.phase != SequencerPhase::Idle);
    if !active {
        return reply(ctx, &command, "❌ No estoy conectado a ningún canal de voz").await;
    }

    let cleared = bot.registry.leave(guild_id);
    let content = if cleared > 0 {
        format!("👋 Desconectando del canal de voz ({} audios descartados)", cleared)
    } else {
        "👋 Desconectando del canal de voz".to_string()
    };
    reply(ctx, &command, content).await
}

async fn handle_metrics(ctx: &Context, command: CommandInteraction, bot: &NarradorBot) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Comando usado fuera de un servidor"))?;
    let kind = MetricsKind::parse(string_option(&command, "tipo").unwrap_or("general"));

    info!("📊 Comando metrics ejecutado con tipo: {:?}", kind);
    let stats = bot.metrics.guild_stats(guild_id);
    let embed = embeds::create_metrics_embed(&stats, kind);

    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(CreateInteractionResponseMessage::new().embed(embed)),
        )
        .await?;
    Ok(())
}
