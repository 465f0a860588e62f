// src/discord/enforce.rs
//! Wykonanie werdyktów na Discordzie: kasowanie, ogłoszenia, timeouty, kary antiraid.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use serenity::all::{
    ChannelId, Colour, Context, CreateEmbed, CreateEmbedFooter, CreateMessage, EditMember, GuildId,
    MessageId, Timestamp, UserId,
};
use serenity::http::HttpError;

use crate::antiraid::{PunishedMember, RaidAction};
use crate::modlog::{ActionLog, LogCard};
use crate::pipeline::{QueuedMessage, Verdict, Violation};

const AUDIT_REASON: &str = "Tigris AutoMod";

/* ==============================
   Teksty ogłoszeń
   ============================== */

fn warnings_tail(left: u32) -> String {
    match left {
        0 => "Next violation results in a timeout.".to_string(),
        1 => "You will be muted after **1** more warning.".to_string(),
        n => format!("You will be muted after **{n}** more warnings."),
    }
}

fn violation_text(author_id: u64, violation: &Violation) -> String {
    match violation {
        Violation::Fonts { chars } => {
            let listed = chars.iter().map(|c| format!("`{c}`")).collect::<Vec<_>>().join(" ");
            format!("<@{author_id}>, your message contains characters that are not allowed here: {listed}")
        }
        Violation::Spam { .. } => format!("<@{author_id}>, please stop spamming."),
        Violation::Blacklist { censored: Some(text) } => {
            format!("<@{author_id}>, watch your language.\n> {text}")
        }
        Violation::Blacklist { censored: None } => format!("<@{author_id}>, watch your language."),
    }
}

/// Krótkie ogłoszenie na kanale; `None` dla `Allowed`.
pub fn notice_text(author_id: u64, verdict: &Verdict) -> Option<String> {
    match verdict {
        Verdict::Allowed => None,
        Verdict::SingleDelete { violation, warnings_left, .. }
        | Verdict::QueueDelete { violation, warnings_left, .. } => Some(format!(
            "{}\n{}",
            violation_text(author_id, violation),
            warnings_tail(*warnings_left)
        )),
        Verdict::Muted { duration, violation, .. } => Some(format!(
            "{}\n<@{author_id}> has been muted for **{}** minutes.",
            violation_text(author_id, violation),
            duration.as_secs() / 60
        )),
    }
}

pub fn raid_dm_text(guild_name: &str, action: RaidAction) -> String {
    match action {
        RaidAction::Ban => format!("You have been banned from **{guild_name}**: raid protection."),
        RaidAction::Kick => format!("You have been kicked from **{guild_name}**: raid protection."),
        RaidAction::Timeout { minutes } => format!(
            "You have been timed out on **{guild_name}** for {minutes} minutes: raid protection."
        ),
    }
}

pub fn rename_dm_text(guild_name: &str, old: &str, new: &str) -> String {
    format!(
        "Your nickname `{old}` is not allowed on **{guild_name}**. It has been changed to `{new}`."
    )
}

/* ==============================
   Błędy HTTP
   ============================== */

fn http_status(e: &serenity::Error) -> Option<u16> {
    match e {
        serenity::Error::Http(HttpError::UnsuccessfulRequest(resp)) => Some(resp.status_code.as_u16()),
        _ => None,
    }
}

pub fn is_forbidden(e: &serenity::Error) -> bool {
    http_status(e) == Some(403)
}

/// Wiadomość już skasowana (np. przez autora) – nie ma czego robić.
pub fn is_not_found(e: &serenity::Error) -> bool {
    http_status(e) == Some(404)
}

/* ==============================
   Akcje
   ============================== */

fn timestamp_after(duration: Duration) -> serenity::Result<Timestamp> {
    let secs = i64::try_from(duration.as_secs()).unwrap_or(i64::MAX / 2);
    let until = Utc::now().timestamp().saturating_add(secs);
    Timestamp::from_unix_timestamp(until)
        .map_err(|_| serenity::Error::Other("timeout timestamp out of range"))
}

/// Kasuje wiadomości kanał po kanale; pojedyncza → `delete_message`, reszta → bulk.
pub async fn delete_messages(ctx: &Context, messages: &[&QueuedMessage]) -> serenity::Result<()> {
    let mut by_channel: BTreeMap<u64, Vec<MessageId>> = BTreeMap::new();
    for m in messages {
        by_channel.entry(m.channel_id).or_default().push(MessageId::new(m.message_id));
    }

    for (channel, ids) in by_channel {
        let ch = ChannelId::new(channel);
        let res = match ids.as_slice() {
            [one] => ch.delete_message(&ctx.http, *one).await,
            many => ch.delete_messages(&ctx.http, many.to_vec()).await,
        };
        match res {
            Err(e) if is_not_found(&e) => {}
            other => other?,
        }
    }
    Ok(())
}

/// Ogłoszenie znika samo po `delete_after`.
pub async fn send_notice(
    ctx: &Context,
    channel_id: u64,
    text: String,
    delete_after: Duration,
) -> serenity::Result<()> {
    let ch = ChannelId::new(channel_id);
    let sent = ch.send_message(&ctx.http, CreateMessage::new().content(text)).await?;

    let http = ctx.http.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delete_after).await;
        if let Err(e) = ch.delete_message(&http, sent.id).await {
            tracing::debug!(error=?e, channel_id, "notice cleanup failed");
        }
    });
    Ok(())
}

pub async fn timeout_member(
    ctx: &Context,
    guild_id: u64,
    member_id: u64,
    duration: Duration,
) -> serenity::Result<()> {
    let until = timestamp_after(duration)?;
    let mut member = GuildId::new(guild_id).member(ctx, UserId::new(member_id)).await?;
    member.disable_communication_until_datetime(&ctx.http, until).await
}

pub async fn rename_member(ctx: &Context, guild_id: u64, member_id: u64, nick: &str) -> serenity::Result<()> {
    GuildId::new(guild_id)
        .edit_member(&ctx.http, UserId::new(member_id), EditMember::new().nickname(nick))
        .await?;
    Ok(())
}

/// DM bywa zablokowany – błąd tylko logujemy.
pub async fn send_dm(ctx: &Context, user_id: u64, text: String) {
    let res = async {
        let dm = UserId::new(user_id).create_dm_channel(&ctx.http).await?;
        dm.send_message(&ctx.http, CreateMessage::new().content(text)).await?;
        Ok::<(), serenity::Error>(())
    }
    .await;
    if let Err(e) = res {
        tracing::debug!(error=?e, user_id, "direct message not delivered");
    }
}

pub async fn punish_raider(ctx: &Context, guild_id: u64, p: &PunishedMember) -> serenity::Result<()> {
    let gid = GuildId::new(guild_id);
    let uid = UserId::new(p.member_id);
    match p.action {
        RaidAction::Ban => gid.ban_with_reason(&ctx.http, uid, 0, AUDIT_REASON).await,
        RaidAction::Kick => gid.kick_with_reason(&ctx.http, uid, AUDIT_REASON).await,
        RaidAction::Timeout { minutes } => {
            timeout_member(ctx, guild_id, p.member_id, Duration::from_secs(u64::from(minutes) * 60)).await
        }
    }
}

/* ==============================
   Dziennik moderacji
   ============================== */

fn log_embed(card: LogCard) -> CreateEmbed {
    card.fields.into_iter().fold(
        CreateEmbed::new()
            .title(card.title)
            .description(card.description)
            .colour(Colour::new(card.colour))
            .footer(CreateEmbedFooter::new("Tigris AutoMod – Dziennik moderacji"))
            .timestamp(Timestamp::now()),
        |embed, f| embed.field(f.name, f.value, f.inline),
    )
}

pub async fn send_log(ctx: &Context, channel_id: u64, log: &ActionLog) -> serenity::Result<()> {
    ChannelId::new(channel_id)
        .send_message(&ctx.http, CreateMessage::new().embed(log_embed(log.card())))
        .await?;
    Ok(())
}
