use std::path::PathBuf;

use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::model::config::AppConfig;
use crate::services::config as config_store;
use crate::services::session::Session;

mod command;
mod table;
use command::Command;

type Reply = Result<Value, String>;

/// Shared state behind the line protocol. Requests are handled
/// concurrently; the lock is never held across a provider call.
pub struct Core {
    config_path: PathBuf,
    out: UnboundedSender<String>,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    config: AppConfig,
    session: Option<Session>,
    /// Bumped on every successful open so a running translation can tell
    /// its table was replaced.
    generation: u64,
    job: Option<CancellationToken>,
}

impl Core {
    pub fn new(config_path: PathBuf, out: UnboundedSender<String>) -> Self {
        let config = config_store::load(&config_path);
        Core {
            config_path,
            out,
            state: Mutex::new(State {
                config,
                ..State::default()
            }),
        }
    }

    /// Pushes an unsolicited line (progress, log) ahead of the response.
    fn emit(&self, id: &Value, kind: &str, payload: Value) {
        let _ = self.out.send(event(id, kind, payload));
    }
}

fn get_cmd(req: &Value) -> &str {
    req.get("cmd").and_then(|v| v.as_str()).unwrap_or("")
}

fn get_id(req: &Value) -> Value {
    req.get("id").cloned().unwrap_or(Value::Null)
}

fn get_payload(req: &Value) -> &Value {
    static EMPTY: Value = Value::Null;
    req.get("payload").unwrap_or(&EMPTY)
}

fn get_str<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn ok(id: Value, payload: Value) -> String {
    json!({
        "id": id,
        "status": "ok",
        "payload": payload
    })
    .to_string()
}

fn err(id: Value, message: impl Into<String>) -> String {
    json!({
        "id": id,
        "status": "error",
        "message": message.into()
    })
    .to_string()
}

fn event(id: &Value, kind: &str, payload: Value) -> String {
    json!({
        "id": id,
        "status": "event",
        "event": kind,
        "payload": payload
    })
    .to_string()
}

pub async fn handle(core: &Core, input: &str) -> String {
    let req: Value = match serde_json::from_str(input) {
        Ok(v) => v,
        Err(_) => {
            return json!({
                "status": "error",
                "message": "invalid json"
            })
            .to_string();
        }
    };

    let id = get_id(&req);
    let cmd_str = get_cmd(&req);
    let payload = get_payload(&req);

    debug!(cmd = cmd_str, "request");

    let reply = match Command::from(cmd_str) {
        Command::Ping => Ok(json!({ "message": "ct-translate-core alive" })),
        Command::ConfigGet => config_get(core).await,
        Command::ConfigSave => config_save(core, payload).await,
        Command::TableOpen => table::open(core, payload).await,
        Command::TableEntries => table::entries(core).await,
        Command::TableEdit => table::edit(core, payload).await,
        Command::TableTranslate => table::translate(core, &id, payload).await,
        Command::TableCancel => table::cancel(core).await,
        Command::TableSave => table::save(core, payload).await,
        Command::TableClose => table::close(core).await,
        Command::TranslateText => table::translate_text(core, &id, payload).await,
        Command::Unknown => Err("unknown command".to_string()),
    };

    match reply {
        Ok(payload) => ok(id, payload),
        Err(message) => err(id, message),
    }
}

async fn config_get(core: &Core) -> Reply {
    let st = core.state.lock().await;
    Ok(json!({ "config": st.config, "path": core.config_path }))
}

/// Replaces and persists the configuration. A running translation keeps
/// the snapshot it started with.
async fn config_save(core: &Core, payload: &Value) -> Reply {
    let raw = payload
        .get("config")
        .cloned()
        .ok_or_else(|| "payload.config is required".to_string())?;

    let config: AppConfig =
        serde_json::from_value(raw).map_err(|e| format!("invalid payload.config: {e}"))?;

    config_store::save(&core.config_path, &config).map_err(|e| e.to_string())?;

    let mut st = core.state.lock().await;
    st.config = config;
    Ok(json!({ "config": st.config }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::{self, UnboundedReceiver};
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TABLE: &str = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\r\n<CheatTable>\r\n  <CheatEntries>\r\n    <CheatEntry>\r\n      <ID>1</ID>\r\n      <Description>\"Infinite Money\"</Description>\r\n    </CheatEntry>\r\n    <CheatEntry>\r\n      <ID>2</ID>\r\n      <Description>Speed &amp; Jump</Description>\r\n    </CheatEntry>\r\n  </CheatEntries>\r\n</CheatTable>\r\n";

    fn core(dir: &std::path::Path) -> (Core, UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Core::new(dir.join("config.json"), tx), rx)
    }

    async fn call(core: &Core, cmd: &str, payload: Value) -> Value {
        let line = json!({ "id": 7, "cmd": cmd, "payload": payload }).to_string();
        serde_json::from_str(&handle(core, &line).await).unwrap()
    }

    #[tokio::test]
    async fn ping_and_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let (core, _rx) = core(dir.path());

        let v = call(&core, "ping", Value::Null).await;
        assert_eq!(v["status"], "ok");
        assert_eq!(v["id"], 7);

        let v = call(&core, "nope", Value::Null).await;
        assert_eq!(v["status"], "error");
        assert_eq!(v["message"], "unknown command");
    }

    #[tokio::test]
    async fn invalid_json_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let (core, _rx) = core(dir.path());

        let v: Value = serde_json::from_str(&handle(&core, "{oops").await).unwrap();
        assert_eq!(v["message"], "invalid json");
    }

    #[tokio::test]
    async fn config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let (core, _rx) = core(dir.path());

        let mut cfg = AppConfig::default();
        cfg.target_language = "zh-TW".into();

        let v = call(&core, "config.save", json!({ "config": cfg })).await;
        assert_eq!(v["status"], "ok");
        assert!(dir.path().join("config.json").exists());

        let v = call(&core, "config.get", Value::Null).await;
        assert_eq!(v["payload"]["config"]["targetLanguage"], "zh-TW");
    }

    #[tokio::test]
    async fn commands_need_an_open_table() {
        let dir = tempfile::tempdir().unwrap();
        let (core, _rx) = core(dir.path());

        for cmd in ["table.entries", "table.translate", "table.save"] {
            let v = call(&core, cmd, Value::Null).await;
            assert_eq!(v["status"], "error", "{cmd}");
            assert_eq!(v["message"], "no cheat table is loaded");
        }
    }

    #[tokio::test]
    async fn open_edit_save() {
        let dir = tempfile::tempdir().unwrap();
        let (core, _rx) = core(dir.path());
        let src = dir.path().join("game.CT");
        std::fs::write(&src, TABLE).unwrap();

        let v = call(&core, "table.open", json!({ "path": src })).await;
        assert_eq!(v["status"], "ok");
        assert_eq!(v["payload"]["entries"][0]["original"], "Infinite Money");
        assert_eq!(v["payload"]["table"]["encoding"]["lineEnding"], "\r\n");

        let v = call(&core, "table.edit", json!({ "region": 1, "translation": "速度" })).await;
        assert_eq!(v["payload"]["entry"]["translation"], "速度");

        let v = call(&core, "table.save", Value::Null).await;
        assert_eq!(v["status"], "ok");
        assert_eq!(v["payload"]["rewritten"], 1);

        let written = std::fs::read_to_string(dir.path().join("game_CN.CT")).unwrap();
        assert_eq!(written, TABLE.replace("Speed &amp; Jump", "速度"));
    }

    #[tokio::test]
    async fn failed_open_keeps_previous_table() {
        let dir = tempfile::tempdir().unwrap();
        let (core, _rx) = core(dir.path());
        let src = dir.path().join("game.CT");
        std::fs::write(&src, TABLE).unwrap();

        call(&core, "table.open", json!({ "path": src })).await;
        let v = call(&core, "table.open", json!({ "path": dir.path().join("missing.CT") })).await;
        assert_eq!(v["status"], "error");

        let v = call(&core, "table.entries", Value::Null).await;
        assert_eq!(v["payload"]["entries"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn translate_table_with_google_free() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("q", "Infinite Money\nSpeed & Jump"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"[[["无限金钱\n","Infinite Money\n",null,null,10],["速度与跳跃","Speed & Jump",null,null,10]]]"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let (core, mut rx) = core(dir.path());
        let src = dir.path().join("game.CT");
        std::fs::write(&src, TABLE).unwrap();

        let mut cfg = AppConfig::default();
        cfg.google_free.base_url = server.uri();
        cfg.google_free.throttle_ms = 0;
        call(&core, "config.save", json!({ "config": cfg })).await;
        call(&core, "table.open", json!({ "path": src })).await;

        let v = call(&core, "table.translate", Value::Null).await;
        assert_eq!(v["status"], "ok", "{v}");
        assert_eq!(v["payload"]["report"]["translated"], 2);
        assert_eq!(v["payload"]["entries"][0]["translation"], "无限金钱");

        let mut saw_progress = false;
        while let Ok(line) = rx.try_recv() {
            let ev: Value = serde_json::from_str(&line).unwrap();
            if ev["event"] == "progress" {
                saw_progress = true;
                assert_eq!(ev["payload"]["total"], 2);
            }
        }
        assert!(saw_progress);

        call(&core, "table.save", Value::Null).await;
        let written = std::fs::read_to_string(dir.path().join("game_CN.CT")).unwrap();
        assert!(written.contains("<Description>\"无限金钱\"</Description>"));
        assert!(written.contains("<Description>速度与跳跃</Description>"));
    }

    #[tokio::test]
    async fn cancel_without_job_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let (core, _rx) = core(dir.path());

        let v = call(&core, "table.cancel", Value::Null).await;
        assert_eq!(v["payload"]["cancelled"], false);
    }
}
