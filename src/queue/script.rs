//! Sandboxed Lua matching scripts
//!
//! Each queue owns one `MatchScript`. The script sees its queue only
//! through a `QueueDataSource` and talks back through `queue.NewMatch`.
//!
//! Scripts get the `table`, `string` and `math` libraries plus the base
//! library with the chunk loaders removed. Every call into the script runs
//! under an instruction budget so a runaway `Update` can't stall the queue,
//! and the state as a whole is capped at `SCRIPT_MEMORY_LIMIT` bytes.

use crate::error::{MatchbotError, Result};
use crate::types::{MatchId, MatchedPlayer, PlayerName};
use mlua::{Function, HookTriggers, Lua, LuaOptions, MultiValue, StdLib, Table, Value};
use std::sync::Arc;
use tracing::{info, warn};

/// Name of the global table holding the queue API and the script's hooks
const QUEUE_TABLE: &str = "queue";

/// Default number of VM instructions one hook invocation may execute
pub const DEFAULT_INSTRUCTION_LIMIT: u32 = 1_000_000;

/// Bytes one queue's Lua state may allocate
pub const SCRIPT_MEMORY_LIMIT: usize = 32 * 1024 * 1024;

/// What a hook invocation amounted to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    /// The hook ran to completion
    Completed,
    /// The script does not define the hook
    Missing,
    /// The hook raised an error or ran out of instructions
    Failed(String),
}

impl HookOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, HookOutcome::Failed(_))
    }
}

/// A match proposed by a script, not yet checked against the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchCandidate {
    pub map: String,
    pub game: String,
    pub engine_version: String,
    pub players: Vec<MatchedPlayer>,
}

/// Everything a matching script may see or do
pub trait QueueDataSource: Send + Sync {
    fn title(&self) -> String;

    /// Names of players currently Waiting
    fn waiting_players(&self) -> Vec<PlayerName>;

    fn map_names(&self) -> Vec<String>;

    fn game_names(&self) -> Vec<String>;

    /// Validate and commit a candidate, returning the new match id
    fn submit_match(&self, candidate: MatchCandidate) -> Result<MatchId>;
}

/// One queue's Lua state
pub struct MatchScript {
    lua: Lua,
    instruction_limit: u32,
}

impl MatchScript {
    /// Build the sandbox, install the queue API and run the script body
    pub fn load(
        queue_name: &str,
        chunk_name: &str,
        source: &str,
        instruction_limit: u32,
        data: Arc<dyn QueueDataSource>,
    ) -> Result<Self> {
        let script_error = |e: mlua::Error| MatchbotError::ScriptError {
            queue: queue_name.to_string(),
            message: describe_error(&e),
        };

        let lua = Lua::new_with(
            StdLib::TABLE | StdLib::STRING | StdLib::MATH,
            LuaOptions::default(),
        )
        .map_err(script_error)?;
        lua.set_memory_limit(SCRIPT_MEMORY_LIMIT)
            .map_err(script_error)?;

        sandbox_globals(&lua, queue_name).map_err(script_error)?;
        install_queue_api(&lua, data).map_err(script_error)?;

        let script = Self {
            lua,
            instruction_limit: instruction_limit.max(1),
        };

        script
            .with_budget(|lua| {
                lua.load(source)
                    .set_name(format!("@{}", chunk_name))
                    .exec()
            })
            .map_err(script_error)?;

        Ok(script)
    }

    /// Invoke `queue.<hook>(args...)` if the script defines it
    pub fn call_hook<A>(&self, hook: &str, args: A) -> HookOutcome
    where
        A: mlua::IntoLuaMulti,
    {
        let function = match self.hook(hook) {
            Ok(Some(function)) => function,
            Ok(None) => return HookOutcome::Missing,
            Err(e) => return HookOutcome::Failed(describe_error(&e)),
        };

        match self.with_budget(|_| function.call::<()>(args)) {
            Ok(()) => HookOutcome::Completed,
            Err(e) => HookOutcome::Failed(describe_error(&e)),
        }
    }

    fn hook(&self, hook: &str) -> mlua::Result<Option<Function>> {
        let namespace = match self.lua.globals().get::<Value>(QUEUE_TABLE)? {
            Value::Table(table) => table,
            _ => {
                return Err(mlua::Error::RuntimeError(format!(
                    "global '{}' is not a table",
                    QUEUE_TABLE
                )))
            }
        };

        match namespace.get::<Value>(hook)? {
            Value::Function(function) => Ok(Some(function)),
            Value::Nil => Ok(None),
            other => Err(mlua::Error::RuntimeError(format!(
                "{}.{} is a {}, not a function",
                QUEUE_TABLE,
                hook,
                other.type_name()
            ))),
        }
    }

    fn with_budget<R>(&self, f: impl FnOnce(&Lua) -> mlua::Result<R>) -> mlua::Result<R> {
        let limit = self.instruction_limit;
        self.lua.set_hook(
            HookTriggers::new().every_nth_instruction(limit),
            move |_lua, _debug| {
                Err(mlua::Error::RuntimeError(format!(
                    "instruction limit exceeded ({})",
                    limit
                )))
            },
        );
        let result = f(&self.lua);
        self.lua.remove_hook();
        result
    }
}

fn sandbox_globals(lua: &Lua, queue_name: &str) -> mlua::Result<()> {
    let globals = lua.globals();
    for name in ["dofile", "loadfile", "load"] {
        globals.set(name, Value::Nil)?;
    }

    let queue_name = queue_name.to_string();
    let print = lua.create_function(move |_, args: MultiValue| {
        let line = args.iter().map(display).collect::<Vec<_>>().join("\t");
        info!("[{}] {}", queue_name, line);
        Ok(())
    })?;
    globals.set("print", print)?;

    Ok(())
}

fn install_queue_api(lua: &Lua, data: Arc<dyn QueueDataSource>) -> mlua::Result<()> {
    let namespace = lua.create_table()?;

    let source = Arc::clone(&data);
    namespace.set(
        "GetTitle",
        lua.create_function(move |_, ()| Ok(source.title()))?,
    )?;

    let source = Arc::clone(&data);
    namespace.set(
        "GetPlayerList",
        lua.create_function(move |_, ()| Ok(source.waiting_players()))?,
    )?;

    let source = Arc::clone(&data);
    namespace.set(
        "GetMapList",
        lua.create_function(move |_, ()| Ok(source.map_names()))?,
    )?;

    let source = Arc::clone(&data);
    namespace.set(
        "GetGameList",
        lua.create_function(move |_, ()| Ok(source.game_names()))?,
    )?;

    let source = data;
    namespace.set(
        "NewMatch",
        lua.create_function(move |_, candidate: Value| {
            let candidate = match parse_candidate(&candidate) {
                Ok(candidate) => candidate,
                Err(problems) => {
                    warn!("Ignoring malformed match candidate: {}", problems.join("; "));
                    return Ok(None);
                }
            };

            match source.submit_match(candidate) {
                Ok(id) => Ok(Some(id)),
                Err(e) => {
                    warn!("Match candidate rejected: {}", e);
                    Ok(None)
                }
            }
        })?,
    )?;

    lua.globals().set(QUEUE_TABLE, namespace)?;
    Ok(())
}

/// Read a candidate table, collecting every structural problem found
fn parse_candidate(value: &Value) -> std::result::Result<MatchCandidate, Vec<String>> {
    let table = match value {
        Value::Table(table) => table,
        other => return Err(vec![format!("expected a table, got {}", other.type_name())]),
    };

    let mut problems = Vec::new();
    let map = string_field(table, "map");
    let game = string_field(table, "game");
    let engine_version = string_field(table, "engineVersion");

    for (field, value) in [("map", &map), ("game", &game), ("engineVersion", &engine_version)] {
        if value.is_none() {
            problems.push(format!("missing string field '{}'", field));
        }
    }

    let mut players = Vec::new();
    match table.get::<Value>("players") {
        Ok(Value::Table(entries)) => {
            for (i, entry) in entries.sequence_values::<Value>().enumerate() {
                let index = i + 1;
                let entry = match entry {
                    Ok(Value::Table(entry)) => entry,
                    _ => {
                        problems.push(format!("player {} is not a table", index));
                        continue;
                    }
                };

                let Some(name) = string_field(&entry, "name") else {
                    problems.push(format!("player {} did not have a name defined", index));
                    continue;
                };
                let team = integer_field(&entry, "team");
                let ally = integer_field(&entry, "ally");

                match (team, ally) {
                    (Some(team), Some(ally)) => players.push(MatchedPlayer { name, team, ally }),
                    (None, _) => problems.push(format!("player {} does not have a team", name)),
                    (_, None) => problems.push(format!("player {} does not have an allyteam", name)),
                }
            }
        }
        _ => problems.push("missing table field 'players'".to_string()),
    }

    if !problems.is_empty() {
        return Err(problems);
    }

    match (map, game, engine_version) {
        (Some(map), Some(game), Some(engine_version)) => Ok(MatchCandidate {
            map,
            game,
            engine_version,
            players,
        }),
        _ => Err(vec!["incomplete candidate".to_string()]),
    }
}

fn string_field(table: &Table, key: &str) -> Option<String> {
    match table.get::<Value>(key) {
        Ok(Value::String(s)) => s.to_str().ok().map(|s| s.to_string()),
        _ => None,
    }
}

fn integer_field(table: &Table, key: &str) -> Option<i64> {
    match table.get::<Value>(key) {
        Ok(Value::Integer(i)) => Some(i),
        Ok(Value::Number(n)) if n.is_finite() && n.fract() == 0.0 => Some(n as i64),
        _ => None,
    }
}

fn describe_error(err: &mlua::Error) -> String {
    match err {
        mlua::Error::RuntimeError(message) => message.clone(),
        mlua::Error::CallbackError { cause, .. } => describe_error(cause),
        mlua::Error::SyntaxError { message, .. } => format!("syntax error: {}", message),
        other => other.to_string(),
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::Nil => "nil".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s
            .to_str()
            .map_or_else(|_| "<invalid utf8>".into(), |s| s.to_string()),
        other => other.type_name().to_string(),
    }
}
