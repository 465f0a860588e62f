// src/discord/mod.rs
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::FutureExt;
use serenity::all::*;
use serenity::async_trait;

use crate::AppContext;
use crate::antiraid::{AntiraidVerdict, MemberJoin};
use crate::commands;
use crate::modlog::{ActionLog, LogCooldown};
use crate::nickfilter::{NickVerdict, NicknameEvent};
use crate::pipeline::{MessageEvent, Verdict};

pub mod enforce;

const PERMISSION_NOTICE: &str =
    "⚠️ Automod cannot act here: I need **Manage Messages** and **Moderate Members** permissions.";

pub struct Handler {
    pub app: Arc<AppContext>,
    // guild_id → kiedy ostatnio ostrzegaliśmy o braku uprawnień
    permission_warnings: DashMap<u64, Instant>,
    log_cooldown: LogCooldown,
}

impl Handler {
    pub fn new(app: Arc<AppContext>) -> Self {
        Self {
            app,
            permission_warnings: DashMap::new(),
            log_cooldown: LogCooldown::default(),
        }
    }

    fn notice_ttl(&self) -> Duration {
        Duration::from_secs(self.app.settings.automod.notice_delete_after_secs)
    }

    /// Raz na `permission_warning_cooldown_secs` per gildia.
    fn permission_warning_due(&self, guild_id: u64) -> bool {
        let cooldown = Duration::from_secs(self.app.settings.automod.permission_warning_cooldown_secs);
        let now = Instant::now();
        if let Some(last) = self.permission_warnings.get(&guild_id) {
            if now.duration_since(*last) < cooldown {
                return false;
            }
        }
        self.permission_warnings.insert(guild_id, now);
        true
    }

    async fn report_failure(&self, ctx: &Context, guild_id: u64, channel_id: u64, e: serenity::Error, what: &str) {
        if enforce::is_forbidden(&e) {
            tracing::warn!(guild_id, channel_id, action = what, "missing permissions for automod action");
            if self.permission_warning_due(guild_id) {
                let _ = enforce::send_notice(ctx, channel_id, PERMISSION_NOTICE.to_string(), self.notice_ttl() * 4).await;
            }
        } else {
            tracing::warn!(error=?e, guild_id, channel_id, action = what, "automod action failed");
        }
    }

    /// Wpisy na kanał logów gildii. Kanał, który zniknął, jest odpinany z konfiguracji.
    async fn log_actions(&self, ctx: &Context, guild_id: u64, logs: Vec<ActionLog>) {
        if logs.is_empty() {
            return;
        }
        let channel_id = match self.app.pipeline.configs().log_channel(guild_id).await {
            Ok(Some(id)) => id,
            Ok(None) => return,
            Err(e) => {
                tracing::debug!(error=?e, guild_id, "log channel lookup failed");
                return;
            }
        };

        for log in logs.iter().filter(|l| self.log_cooldown.allow(guild_id, l)) {
            match enforce::send_log(ctx, channel_id, log).await {
                Ok(()) => {}
                Err(e) if enforce::is_not_found(&e) => {
                    tracing::warn!(guild_id, channel_id, "log channel gone, moderation log disabled");
                    if let Err(e) = self.app.pipeline.configs().set_log_channel(guild_id, None).await {
                        tracing::warn!(error=?e, guild_id, "log channel reset failed");
                    }
                    return;
                }
                Err(e) => tracing::warn!(error=?e, guild_id, channel_id, action = ?log.kind(), "moderation log not sent"),
            }
        }
    }

    /* ---------------- wiadomości ---------------- */

    async fn moderate(&self, ctx: &Context, msg: &Message) {
        let Some(gid) = msg.guild_id else {
            return;
        };
        if msg.author.bot || msg.content.is_empty() {
            return;
        }
        // cache albo REST; wiadomość z edycji (REST) nie niesie `member`
        let member = gid.member(ctx, msg.author.id).await.ok();
        if member.as_ref().is_some_and(|m| manages_guild(ctx, m)) {
            return;
        }

        let role_ids = resolve_role_ids(
            msg.member.as_ref().map(|m| m.roles.as_slice()),
            member.as_ref().map(|m| m.roles.as_slice()),
        );

        let ev = MessageEvent {
            guild_id: gid.get(),
            channel_id: msg.channel_id.get(),
            author_id: msg.author.id.get(),
            message_id: msg.id.get(),
            role_ids,
            content: msg.content.clone(),
        };

        let verdict = self.app.pipeline.process_message(&ev).await;
        if !verdict.is_allowed() {
            self.execute_verdict(ctx, &ev, verdict).await;
        }
    }

    async fn execute_verdict(&self, ctx: &Context, ev: &MessageEvent, verdict: Verdict) {
        let deleted = verdict.deleted_messages();
        if let Err(e) = enforce::delete_messages(ctx, &deleted).await {
            self.report_failure(ctx, ev.guild_id, ev.channel_id, e, "delete").await;
        }

        if let Verdict::Muted { duration, .. } = &verdict {
            if let Err(e) = enforce::timeout_member(ctx, ev.guild_id, ev.author_id, *duration).await {
                self.report_failure(ctx, ev.guild_id, ev.channel_id, e, "timeout").await;
            }
        }

        if let Some(text) = enforce::notice_text(ev.author_id, &verdict) {
            if let Err(e) = enforce::send_notice(ctx, ev.channel_id, text, self.notice_ttl()).await {
                tracing::debug!(error=?e, guild_id = ev.guild_id, "automod notice not sent");
            }
        }

        self.log_actions(ctx, ev.guild_id, ActionLog::from_verdict(ev.author_id, &verdict))
            .await;
    }

    /* ---------------- członkowie ---------------- */

    async fn filter_nickname(&self, ctx: &Context, ev: NicknameEvent) {
        let NickVerdict::Rename { old, new } = self.app.pipeline.check_nickname(&ev).await else {
            return;
        };
        match enforce::rename_member(ctx, ev.guild_id, ev.member_id, &new).await {
            Ok(()) => {
                let guild = guild_name(ctx, ev.guild_id);
                enforce::send_dm(ctx, ev.member_id, enforce::rename_dm_text(&guild, &old, &new)).await;
                self.log_actions(ctx, ev.guild_id, vec![ActionLog::NickChange { target: ev.member_id, old, new }])
                    .await;
            }
            Err(e) => tracing::warn!(error=?e, guild_id = ev.guild_id, member_id = ev.member_id, "nickname rename failed"),
        }
    }

    async fn on_join(&self, ctx: &Context, member: &Member) {
        let guild_id = member.guild_id.get();
        let member_id = member.user.id.get();

        self.filter_nickname(ctx, NicknameEvent {
            guild_id,
            member_id,
            display_name: member.display_name().to_string(),
            role_ids: member.roles.iter().map(|r| r.get()).collect(),
        })
        .await;

        let joined_at = member
            .joined_at
            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts.unix_timestamp(), 0))
            .unwrap_or_else(Utc::now);
        let join = MemberJoin {
            guild_id,
            member_id,
            joined_at,
        };

        let AntiraidVerdict::Punish { members, punishment } = self.app.pipeline.process_member_join(&join).await else {
            return;
        };
        tracing::warn!(guild_id, raiders = members.len(), ?punishment, "raid detected");

        let guild = guild_name(ctx, guild_id);
        let mut logs = Vec::with_capacity(members.len());
        for p in &members {
            // DM przed kickiem/banem – potem nie ma już wspólnej gildii
            enforce::send_dm(ctx, p.member_id, enforce::raid_dm_text(&guild, p.action)).await;
            match enforce::punish_raider(ctx, guild_id, p).await {
                Ok(()) => logs.push(ActionLog::from_raid(p.member_id, p.action)),
                Err(e) => tracing::warn!(error=?e, guild_id, member_id = p.member_id, "antiraid punishment failed"),
            }
        }
        self.log_actions(ctx, guild_id, logs).await;
    }
}

/// Łapie panikę handlera, żeby jedno zdarzenie nie położyło shardu.
async fn guarded<F: Future<Output = ()>>(event: &'static str, fut: F) {
    if AssertUnwindSafe(fut).catch_unwind().await.is_err() {
        tracing::error!(event, "event handler panicked");
    }
}

#[allow(deprecated)]
fn manages_guild(ctx: &Context, member: &Member) -> bool {
    match member.permissions(&ctx.cache) { // (deprecated, ale OK)
        Ok(perms) => perms.manage_guild() || perms.administrator(),
        Err(_) => false,
    }
}

/// Role z wiadomości (gateway), a gdy ich brak (REST) – z pobranego członka.
fn resolve_role_ids(from_message: Option<&[RoleId]>, from_member: Option<&[RoleId]>) -> Vec<u64> {
    from_message
        .or(from_member)
        .map(|roles| roles.iter().map(|r| r.get()).collect())
        .unwrap_or_default()
}

fn guild_name(ctx: &Context, guild_id: u64) -> String {
    ctx.cache
        .guild(GuildId::new(guild_id))
        .map(|g| g.name.clone())
        .unwrap_or_else(|| "this server".to_string())
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        tracing::info!("Logged in as {}", ready.user.name);

        for g in ready.guilds {
            if let Err(e) = commands::register_commands(&ctx, g.id).await {
                tracing::warn!(error=?e, gid=%g.id.get(), "register automod failed");
            }
        }
    }

    async fn guild_create(&self, ctx: Context, guild: Guild, _is_new: Option<bool>) {
        if let Err(e) = commands::register_commands(&ctx, guild.id).await {
            tracing::warn!(error=?e, gid=%guild.id.get(), "register automod failed (on guild_create)");
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        guarded("interaction_create", commands::on_interaction(&ctx, &self.app, interaction)).await;
    }

    async fn message(&self, ctx: Context, msg: Message) {
        guarded("message", self.moderate(&ctx, &msg)).await;
    }

    async fn message_update(
        &self,
        ctx: Context,
        old: Option<Message>,
        _new: Option<Message>,
        event: MessageUpdateEvent,
    ) {
        // edycja bez zmiany treści (embed, pin) nic nie zmienia
        let Some(content) = event.content.as_ref() else {
            return;
        };
        if old.as_ref().is_some_and(|o| &o.content == content) {
            return;
        }

        guarded("message_update", async {
            match event.channel_id.message(&ctx, event.id).await {
                Ok(msg) => self.moderate(&ctx, &msg).await,
                Err(e) => tracing::debug!(error=?e, message_id = event.id.get(), "edited message not fetched"),
            }
        })
        .await;
    }

    async fn message_delete(
        &self,
        _ctx: Context,
        _channel_id: ChannelId,
        message_id: MessageId,
        guild_id: Option<GuildId>,
    ) {
        if let Some(gid) = guild_id {
            self.app.pipeline.on_message_delete(gid.get(), None, message_id.get());
        }
    }

    async fn guild_member_addition(&self, ctx: Context, member: Member) {
        guarded("guild_member_addition", self.on_join(&ctx, &member)).await;
    }

    async fn guild_member_update(
        &self,
        ctx: Context,
        old: Option<Member>,
        _new: Option<Member>,
        event: GuildMemberUpdateEvent,
    ) {
        if event.user.bot {
            return;
        }
        if old.as_ref().is_some_and(|o| o.nick == event.nick) {
            return;
        }

        let display_name = event
            .nick
            .clone()
            .or_else(|| event.user.global_name.clone())
            .unwrap_or_else(|| event.user.name.clone());
        let ev = NicknameEvent {
            guild_id: event.guild_id.get(),
            member_id: event.user.id.get(),
            display_name,
            role_ids: event.roles.iter().map(|r| r.get()).collect(),
        };
        guarded("guild_member_update", self.filter_nickname(&ctx, ev)).await;
    }
}

pub fn intents_from_settings(names: &[String]) -> GatewayIntents {
    let mut i = GatewayIntents::empty();
    for n in names {
        match n.as_str() {
            "GUILDS" => i |= GatewayIntents::GUILDS,
            "GUILD_MEMBERS" => i |= GatewayIntents::GUILD_MEMBERS,
            "GUILD_MESSAGES" => i |= GatewayIntents::GUILD_MESSAGES,
            "MESSAGE_CONTENT" => i |= GatewayIntents::MESSAGE_CONTENT,
            "GUILD_MODERATION" => i |= GatewayIntents::GUILD_MODERATION,
            _ => tracing::warn!(intent = %n, "unknown gateway intent ignored"),
        }
    }
    i
}

pub async fn run_bot(ctx: Arc<AppContext>) -> Result<()> {
    let token = &ctx.settings.discord.token;
    if token.is_empty() {
        anyhow::bail!("Brak tokenu Discord (TAM_DISCORD__TOKEN). Uzupełnij w .env.");
    }

    let mut intents = intents_from_settings(&ctx.settings.discord.intents);
    if intents.is_empty() {
        intents = crate::default_gateway_intents();
    }

    let handler = Handler::new(ctx.clone());

    let mut client = serenity::Client::builder(token, intents)
        .event_handler(handler)
        .await?;

    tracing::info!("Discord client starting…");
    client.start().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intents_are_parsed_by_name() {
        let names = vec!["GUILDS".to_string(), "MESSAGE_CONTENT".to_string(), "BOGUS".to_string()];
        let i = intents_from_settings(&names);
        assert!(i.contains(GatewayIntents::GUILDS));
        assert!(i.contains(GatewayIntents::MESSAGE_CONTENT));
        assert!(!i.contains(GatewayIntents::GUILD_MEMBERS));
    }

    #[test]
    fn roles_fall_back_to_member_when_message_has_none() {
        let member_roles = [RoleId::new(7), RoleId::new(8)];
        assert_eq!(resolve_role_ids(None, Some(&member_roles)), vec![7, 8]);

        let message_roles = [RoleId::new(3)];
        assert_eq!(resolve_role_ids(Some(&message_roles), Some(&member_roles)), vec![3]);
        assert!(resolve_role_ids(None, None).is_empty());
    }
}
