// src/commands.rs
//! `/automod` – administracja filtrami gildii.
//!
//! Discord → [`Arg`] → [`parse`] → [`AutomodCommand`] → [`execute`] → tekst odpowiedzi.
//! Parser i wykonanie nie dotykają Discorda, więc da się je testować na pamięciowych store'ach.

use anyhow::Result;
use serenity::all::{
    CommandDataOption, CommandDataOptionValue, CommandInteraction, CommandOptionType, Context,
    CreateCommand, CreateCommandOption, CreateInteractionResponse,
    CreateInteractionResponseMessage, EditInteractionResponse, GuildId, Interaction, Permissions,
};

use crate::AppContext;
use crate::classifier::ModelStore;
use crate::error::{AdminError, AdminResult};
use crate::guild::{AntiraidPunishment, BlacklistMode, FilterGate, FilterKind, MAX_WORDS_PER_MODE};
use crate::pipeline::ModerationPipeline;

pub const COMMAND_NAME: &str = "automod";

const REPLY_LIMIT: usize = 1900;

/// Wartość opcji po zdjęciu typów Discorda.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    Str(String),
    Int(i64),
    Bool(bool),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutomodCommand {
    Status,
    Toggle { filter: FilterKind, enabled: bool },
    IgnoreAdd { filter: FilterKind, id: u64 },
    IgnoreRemove { filter: FilterKind, id: u64 },
    BlacklistAdd { mode: BlacklistMode, expression: String },
    BlacklistAddMany { mode: BlacklistMode, words: Vec<String> },
    BlacklistRemove { mode: BlacklistMode, expression: String },
    BlacklistClear { mode: Option<BlacklistMode> },
    BlacklistFilter { enabled: bool },
    BlacklistList { mode: BlacklistMode },
    WhitelistCharacters { characters: String },
    Warnings { threshold: u32, timeout_minutes: Option<u32> },
    Antiraid { members_limit: u32, join_interval_secs: u32, punishment: AntiraidPunishment },
    /// `None` wyłącza dziennik.
    LogChannel { channel_id: Option<u64> },
    ModelReload,
    TrainingStats,
    TrainingNext,
    TrainingLabel { is_spam: bool },
}

/* ==============================
   Parsowanie
   ============================== */

fn find<'a>(args: &'a [(String, Arg)], name: &str) -> Option<&'a Arg> {
    args.iter().find(|(n, _)| n == name).map(|(_, v)| v)
}

fn missing(name: &str) -> AdminError {
    AdminError::InvalidValue(format!("missing option `{name}`"))
}

fn opt_str<'a>(args: &'a [(String, Arg)], name: &str) -> AdminResult<Option<&'a str>> {
    match find(args, name) {
        None => Ok(None),
        Some(Arg::Str(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(AdminError::InvalidValue(format!("`{name}` must be text"))),
    }
}

fn str_arg<'a>(args: &'a [(String, Arg)], name: &str) -> AdminResult<&'a str> {
    opt_str(args, name)?.ok_or_else(|| missing(name))
}

fn bool_arg(args: &[(String, Arg)], name: &str) -> AdminResult<bool> {
    match find(args, name) {
        Some(Arg::Bool(b)) => Ok(*b),
        Some(_) => Err(AdminError::InvalidValue(format!("`{name}` must be true or false"))),
        None => Err(missing(name)),
    }
}

fn opt_u32(args: &[(String, Arg)], name: &str) -> AdminResult<Option<u32>> {
    match find(args, name) {
        None => Ok(None),
        Some(Arg::Int(i)) => u32::try_from(*i)
            .map(Some)
            .map_err(|_| AdminError::InvalidValue(format!("`{name}` out of range: {i}"))),
        Some(_) => Err(AdminError::InvalidValue(format!("`{name}` must be a number"))),
    }
}

fn u32_arg(args: &[(String, Arg)], name: &str) -> AdminResult<u32> {
    opt_u32(args, name)?.ok_or_else(|| missing(name))
}

fn mode_arg(args: &[(String, Arg)]) -> AdminResult<BlacklistMode> {
    str_arg(args, "mode")?.parse()
}

fn filter_arg(args: &[(String, Arg)]) -> AdminResult<FilterKind> {
    str_arg(args, "filter")?.parse()
}

/// Surowe id albo wzmianka: `123`, `<#123>`, `<@&123>`, `<@!123>`.
pub fn parse_snowflake(raw: &str) -> AdminResult<u64> {
    let trimmed = raw
        .trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .trim_start_matches(['#', '@', '&', '!']);
    trimmed
        .parse::<u64>()
        .ok()
        .filter(|id| *id != 0)
        .ok_or_else(|| AdminError::InvalidValue(format!("`{raw}` is not a channel or role id")))
}

pub fn parse(sub: &str, args: &[(String, Arg)]) -> AdminResult<AutomodCommand> {
    use AutomodCommand as C;

    Ok(match sub {
        "status" => C::Status,
        "toggle" => C::Toggle {
            filter: filter_arg(args)?,
            enabled: bool_arg(args, "enabled")?,
        },
        "ignore-add" => C::IgnoreAdd {
            filter: filter_arg(args)?,
            id: parse_snowflake(str_arg(args, "target")?)?,
        },
        "ignore-remove" => C::IgnoreRemove {
            filter: filter_arg(args)?,
            id: parse_snowflake(str_arg(args, "target")?)?,
        },
        "blacklist-add" => C::BlacklistAdd {
            mode: mode_arg(args)?,
            expression: str_arg(args, "expression")?.to_string(),
        },
        "blacklist-addmany" => {
            let words: Vec<String> = str_arg(args, "words")?
                .split(',')
                .map(str::trim)
                .filter(|w| !w.is_empty())
                .map(str::to_string)
                .collect();
            if words.is_empty() {
                return Err(AdminError::EmptyExpression);
            }
            C::BlacklistAddMany {
                mode: mode_arg(args)?,
                words,
            }
        }
        "blacklist-remove" => C::BlacklistRemove {
            mode: mode_arg(args)?,
            expression: str_arg(args, "expression")?.to_string(),
        },
        "blacklist-clear" => C::BlacklistClear {
            mode: match opt_str(args, "mode")? {
                None | Some("all") => None,
                Some(m) => Some(m.parse()?),
            },
        },
        "blacklist-filter" => C::BlacklistFilter {
            enabled: bool_arg(args, "enabled")?,
        },
        "blacklist-list" => C::BlacklistList { mode: mode_arg(args)? },
        "whitelist-chars" => C::WhitelistCharacters {
            characters: str_arg(args, "characters")?.to_string(),
        },
        "warnings" => C::Warnings {
            threshold: u32_arg(args, "threshold")?,
            timeout_minutes: opt_u32(args, "timeout")?,
        },
        "antiraid" => C::Antiraid {
            members_limit: u32_arg(args, "limit")?,
            join_interval_secs: u32_arg(args, "interval")?,
            punishment: str_arg(args, "punishment")?.parse()?,
        },
        "log-channel" => C::LogChannel {
            channel_id: opt_str(args, "channel")?.map(parse_snowflake).transpose()?,
        },
        "model-reload" => C::ModelReload,
        "training-stats" => C::TrainingStats,
        "training-next" => C::TrainingNext,
        "training-label" => C::TrainingLabel {
            is_spam: bool_arg(args, "spam")?,
        },
        other => return Err(AdminError::InvalidValue(format!("unknown subcommand `{other}`"))),
    })
}

/* ==============================
   Wykonanie
   ============================== */

fn on_off(b: bool) -> &'static str {
    if b { "enabled" } else { "disabled" }
}

async fn status(pipeline: &ModerationPipeline, guild_id: u64) -> AdminResult<String> {
    let cfg = pipeline.configs().get(guild_id).await?;
    let line = |kind: FilterKind, gate: &dyn FilterGate| {
        format!("**{kind}**: {} ({} ignored)", on_off(gate.enabled()), gate.ignored().len())
    };
    let mut out = vec![
        line(FilterKind::Antispam, &cfg.antispam),
        line(FilterKind::Blacklist, &cfg.blacklist),
        line(FilterKind::Whitelist, &cfg.whitelist),
        line(FilterKind::Nickfilter, &cfg.nickfilter),
        format!(
            "**antiraid**: {} ({} joins / {}s → {:?})",
            on_off(cfg.antiraid.enabled),
            cfg.antiraid.members_limit,
            cfg.antiraid.join_interval_secs,
            cfg.antiraid.punishment
        ),
        format!(
            "warnings: threshold {}, timeout {} min",
            cfg.warnings.threshold, cfg.warnings.timeout_minutes
        ),
        format!(
            "blacklist words: common {}, wild {}, super {} (censor {})",
            cfg.blacklist.common.len(),
            cfg.blacklist.wild.len(),
            cfg.blacklist.super_.len(),
            on_off(cfg.blacklist.filter_enabled)
        ),
    ];
    out.push(match cfg.log_channel_id {
        Some(id) => format!("log channel: <#{id}>"),
        None => "log channel: none".to_string(),
    });
    out.push(format!(
        "spam model: {}",
        if pipeline.classifier().is_loaded() { "loaded" } else { "not loaded" }
    ));
    Ok(out.join("\n"))
}

/// Wykonuje komendę w kontekście gildii; zwraca treść odpowiedzi dla admina.
pub async fn execute(
    pipeline: &ModerationPipeline,
    model: Option<&dyn ModelStore>,
    guild_id: u64,
    cmd: AutomodCommand,
) -> AdminResult<String> {
    use AutomodCommand as C;
    let configs = pipeline.configs();

    match cmd {
        C::Status => status(pipeline, guild_id).await,
        C::Toggle { filter, enabled } => {
            configs.set_enabled(guild_id, filter, enabled).await?;
            Ok(format!("{filter} {}", on_off(enabled)))
        }
        C::IgnoreAdd { filter, id } => {
            configs.add_ignored(guild_id, filter, id).await?;
            Ok(format!("{filter} now ignores `{id}`"))
        }
        C::IgnoreRemove { filter, id } => {
            configs.remove_ignored(guild_id, filter, id).await?;
            Ok(format!("{filter} no longer ignores `{id}`"))
        }
        C::BlacklistAdd { mode, expression } => {
            let stored = configs.add_blacklist_word(guild_id, mode, &expression).await?;
            Ok(format!("added `{stored}` to the {mode} blacklist"))
        }
        C::BlacklistAddMany { mode, words } => {
            let report = configs.add_many_blacklist_words(guild_id, mode, &words).await?;
            Ok(format!(
                "{mode} blacklist: {} added, {} already present",
                report.added, report.already_present
            ))
        }
        C::BlacklistRemove { mode, expression } => {
            configs.remove_blacklist_word(guild_id, mode, &expression).await?;
            Ok(format!("removed `{expression}` from the {mode} blacklist"))
        }
        C::BlacklistClear { mode } => {
            configs.clear_blacklist(guild_id, mode).await?;
            Ok(match mode {
                Some(m) => format!("{m} blacklist cleared"),
                None => "all blacklists cleared".to_string(),
            })
        }
        C::BlacklistFilter { enabled } => {
            configs.set_blacklist_filter(guild_id, enabled).await?;
            Ok(format!("blacklist censoring {}", on_off(enabled)))
        }
        C::BlacklistList { mode } => {
            let bl = configs.blacklist(guild_id).await?;
            let words = bl.words(mode);
            if words.is_empty() {
                return Ok(format!("{mode} blacklist is empty"));
            }
            let listed = words.iter().map(|w| format!("`{w}`")).collect::<Vec<_>>().join(", ");
            Ok(format!("{mode} ({}/{MAX_WORDS_PER_MODE}): {listed}", words.len()))
        }
        C::WhitelistCharacters { characters } => {
            configs.set_whitelist_characters(guild_id, &characters).await?;
            Ok(format!("whitelist set ({} characters)", characters.chars().count()))
        }
        C::Warnings { threshold, timeout_minutes } => {
            let w = configs.set_warnings(guild_id, threshold, timeout_minutes).await?;
            Ok(format!(
                "warnings threshold {}, timeout {} min",
                w.threshold, w.timeout_minutes
            ))
        }
        C::Antiraid { members_limit, join_interval_secs, punishment } => {
            configs
                .set_antiraid(guild_id, members_limit, join_interval_secs, punishment)
                .await?;
            Ok(format!(
                "antiraid: {members_limit} joins within {join_interval_secs}s → {punishment:?}"
            ))
        }
        C::LogChannel { channel_id } => {
            configs.set_log_channel(guild_id, channel_id).await?;
            Ok(match channel_id {
                Some(id) => format!("moderation log goes to <#{id}>"),
                None => "moderation log disabled".to_string(),
            })
        }
        C::ModelReload => {
            let Some(store) = model else {
                return Err(AdminError::InvalidValue("no spam model path configured".to_string()));
            };
            pipeline
                .reload_model(store)
                .await
                .map_err(|e| AdminError::InvalidValue(format!("model reload failed: {e}")))?;
            Ok("spam model reloaded".to_string())
        }
        C::TrainingStats => {
            let c = pipeline.training().counts().await?;
            Ok(format!("training data: {} samples, {} labelled", c.total, c.validated))
        }
        C::TrainingNext => Ok(match pipeline.training().next_unlabeled().await? {
            Some(s) => format!(
                "#{} `{}`\nchars {}/{} unique, words {}/{} unique",
                s.id,
                s.content,
                s.features.total_chars,
                s.features.unique_chars,
                s.features.total_words,
                s.features.unique_words
            ),
            None => "nothing left to label".to_string(),
        }),
        C::TrainingLabel { is_spam } => {
            let Some(sample) = pipeline.training().next_unlabeled().await? else {
                return Ok("nothing left to label".to_string());
            };
            let changed = pipeline
                .training()
                .label(&sample.content, sample.features, is_spam)
                .await?;
            Ok(format!(
                "#{} labelled as {} ({changed} rows)",
                sample.id,
                if is_spam { "spam" } else { "not spam" }
            ))
        }
    }
}

/* ==============================
   Discord
   ============================== */

fn filter_option(name: &str, desc: &str) -> CreateCommandOption {
    let mut opt = CreateCommandOption::new(CommandOptionType::String, name, desc).required(true);
    for kind in ["antispam", "blacklist", "whitelist", "nickfilter", "antiraid"] {
        opt = opt.add_string_choice(kind, kind);
    }
    opt
}

fn mode_option(required: bool) -> CreateCommandOption {
    let mut opt = CreateCommandOption::new(CommandOptionType::String, "mode", "Blacklist mode")
        .required(required);
    for m in BlacklistMode::ALL {
        opt = opt.add_string_choice(m.as_str(), m.as_str());
    }
    opt
}

fn sub(name: &str, desc: &str) -> CreateCommandOption {
    CreateCommandOption::new(CommandOptionType::SubCommand, name, desc)
}

fn text(name: &str, desc: &str) -> CreateCommandOption {
    CreateCommandOption::new(CommandOptionType::String, name, desc).required(true)
}

fn flag(name: &str, desc: &str) -> CreateCommandOption {
    CreateCommandOption::new(CommandOptionType::Boolean, name, desc).required(true)
}

fn int(name: &str, desc: &str, required: bool) -> CreateCommandOption {
    CreateCommandOption::new(CommandOptionType::Integer, name, desc)
        .required(required)
        .min_int_value(0)
}

fn automod_command() -> CreateCommand {
    CreateCommand::new(COMMAND_NAME)
        .description("Automoderation settings")
        .add_option(sub("status", "Show the automod configuration"))
        .add_option(
            sub("toggle", "Enable or disable a filter")
                .add_sub_option(filter_option("filter", "Filter"))
                .add_sub_option(flag("enabled", "On or off")),
        )
        .add_option(
            sub("ignore-add", "Exempt a channel or role from a filter")
                .add_sub_option(filter_option("filter", "Filter"))
                .add_sub_option(text("target", "Channel or role id")),
        )
        .add_option(
            sub("ignore-remove", "Remove an exemption")
                .add_sub_option(filter_option("filter", "Filter"))
                .add_sub_option(text("target", "Channel or role id")),
        )
        .add_option(
            sub("blacklist-add", "Add an expression to the blacklist")
                .add_sub_option(mode_option(true))
                .add_sub_option(text("expression", "Word or phrase")),
        )
        .add_option(
            sub("blacklist-addmany", "Add several comma separated expressions")
                .add_sub_option(mode_option(true))
                .add_sub_option(text("words", "Comma separated expressions")),
        )
        .add_option(
            sub("blacklist-remove", "Remove an expression from the blacklist")
                .add_sub_option(mode_option(true))
                .add_sub_option(text("expression", "Word or phrase")),
        )
        .add_option(
            sub("blacklist-clear", "Clear one or all blacklist modes")
                .add_sub_option(mode_option(false)),
        )
        .add_option(
            sub("blacklist-filter", "Show censored text in notices")
                .add_sub_option(flag("enabled", "On or off")),
        )
        .add_option(sub("blacklist-list", "List blacklist expressions").add_sub_option(mode_option(true)))
        .add_option(
            sub("whitelist-chars", "Replace the set of allowed characters")
                .add_sub_option(text("characters", "Allowed characters")),
        )
        .add_option(
            sub("warnings", "Warnings before a timeout")
                .add_sub_option(int("threshold", "Warnings before timeout", true))
                .add_sub_option(int("timeout", "Timeout length in minutes", false)),
        )
        .add_option(
            sub("antiraid", "Configure raid detection")
                .add_sub_option(int("limit", "Joins that count as a raid", true))
                .add_sub_option(int("interval", "Within this many seconds", true))
                .add_sub_option(
                    text("punishment", "What happens to raiders")
                        .add_string_choice("ban", "ban")
                        .add_string_choice("kick", "kick")
                        .add_string_choice("timeout", "timeout"),
                ),
        )
        .add_option(
            sub("log-channel", "Set or clear the moderation log channel").add_sub_option(
                CreateCommandOption::new(CommandOptionType::String, "channel", "Channel id, empty disables")
                    .required(false),
            ),
        )
        .add_option(sub("model-reload", "Reload the spam model from disk"))
        .add_option(sub("training-stats", "Training data counters"))
        .add_option(sub("training-next", "Show the next unlabelled sample"))
        .add_option(
            sub("training-label", "Label the next unlabelled sample")
                .add_sub_option(flag("spam", "Is it spam?")),
        )
        .default_member_permissions(Permissions::MANAGE_GUILD)
}

/// Rejestr /automod (per gildia)
pub async fn register_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.create_command(&ctx.http, automod_command()).await?;
    Ok(())
}

/// Router interakcji
pub async fn on_interaction(ctx: &Context, app: &AppContext, interaction: Interaction) {
    let Some(cmd) = interaction.command() else {
        return;
    };
    if cmd.data.name != COMMAND_NAME {
        return;
    }
    if let Err(e) = handle(ctx, app, &cmd).await {
        tracing::warn!(error=?e, "automod command failed");
    }
}

fn to_args(opts: &[CommandDataOption]) -> Vec<(String, Arg)> {
    opts.iter()
        .filter_map(|o| {
            let v = match &o.value {
                CommandDataOptionValue::String(s) => Arg::Str(s.clone()),
                CommandDataOptionValue::Integer(i) => Arg::Int(*i),
                CommandDataOptionValue::Boolean(b) => Arg::Bool(*b),
                _ => return None,
            };
            Some((o.name.clone(), v))
        })
        .collect()
}

fn truncate_reply(mut s: String) -> String {
    if s.chars().count() > REPLY_LIMIT {
        s = s.chars().take(REPLY_LIMIT - 1).collect();
        s.push('…');
    }
    s
}

async fn handle(ctx: &Context, app: &AppContext, cmd: &CommandInteraction) -> Result<()> {
    cmd.create_response(
        &ctx.http,
        CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new().ephemeral(true)),
    )
    .await?;

    let Some(gid) = cmd.guild_id else {
        return reply(ctx, cmd, "This command only works in a server.".to_string()).await;
    };

    let allowed = cmd
        .member
        .as_ref()
        .and_then(|m| m.permissions)
        .is_some_and(|p| p.manage_guild() || p.administrator());
    if !allowed {
        return reply(ctx, cmd, "⛔ Manage Server permission required.".to_string()).await;
    }

    let Some((sub_name, sub_opts)) = cmd.data.options.first().and_then(|o| match &o.value {
        CommandDataOptionValue::SubCommand(opts) => Some((o.name.as_str(), opts.as_slice())),
        _ => None,
    }) else {
        return Ok(());
    };

    let args = to_args(sub_opts);
    let model = app.model_store();
    let outcome = match parse(sub_name, &args) {
        Ok(command) => {
            execute(
                &app.pipeline,
                model.as_ref().map(|m| m as &dyn ModelStore),
                gid.get(),
                command,
            )
            .await
        }
        Err(e) => Err(e),
    };

    let text = match outcome {
        Ok(text) => text,
        Err(AdminError::Store(e)) => {
            tracing::warn!(error=?e, guild_id = gid.get(), sub = sub_name, "automod config store failed");
            "⛔ Storage error, try again later.".to_string()
        }
        Err(e) => format!("⛔ {e}"),
    };
    reply(ctx, cmd, text).await
}

async fn reply(ctx: &Context, cmd: &CommandInteraction, text: String) -> Result<()> {
    cmd.edit_response(&ctx.http, EditInteractionResponse::new().content(truncate_reply(text)))
        .await?;
    Ok(())
}
