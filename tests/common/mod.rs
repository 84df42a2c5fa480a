//! 統合テスト共通フィクスチャ
//!
//! FakeHost 上で動かすテスト用コンテキストと、コールバック観測用の記録領域。

#![allow(dead_code)]

use std::cell::RefCell;
use std::time::Duration;

use veil_wasm_sdk::testing::FakeHost;
use veil_wasm_sdk::traits::*;
use veil_wasm_sdk::types::*;

thread_local! {
    static EVENTS: RefCell<Vec<String>> = RefCell::new(Vec::new());
    static DEFERRED: RefCell<Vec<u32>> = RefCell::new(Vec::new());
}

/// コールバックの観測を記録
pub fn record(event: impl Into<String>) {
    EVENTS.with(|events| events.borrow_mut().push(event.into()));
}

/// 記録済みの観測を取得
pub fn events() -> Vec<String> {
    EVENTS.with(|events| events.borrow().clone())
}

/// ホストをインストールしてルートコンテキスト 1 を起動
pub fn boot(root: NewRootContext) -> FakeHost {
    let host = FakeHost::new();
    host.install();
    veil_wasm_sdk::set_root_context(root);
    assert!(host.start_vm(1, b""));
    host
}

// ====================
// ルートコンテキスト
// ====================

/// 子コンテキストをファクトリに任せるだけのルート
pub struct PlainRoot;

impl Context for PlainRoot {}

impl RootContext for PlainRoot {}

/// 設定・ティック・キューを扱うルート
pub struct QueueRoot {
    pub queue_id: Option<u32>,
}

impl Context for QueueRoot {}

impl RootContext for QueueRoot {
    fn on_configure(&mut self, _plugin_configuration_size: usize) -> bool {
        let config = match self.get_configuration_as::<QueueConfig>() {
            Ok(Some(config)) => config,
            Ok(None) => QueueConfig::default(),
            Err(err) => {
                record(format!("config error: {}", err));
                return false;
            }
        };
        self.queue_id = self.register_shared_queue(&config.queue).ok();
        let _ = self.set_tick_period(Duration::from_millis(config.tick_ms));
        true
    }

    fn on_tick(&mut self) {
        if let Some(queue_id) = self.queue_id {
            let _ = self.enqueue_shared_queue(queue_id, Some(b"tick"));
        }
    }

    fn on_queue_ready(&mut self, queue_id: u32) {
        while let Ok(Some(message)) = self.dequeue_shared_queue(queue_id) {
            record(format!("queue {} {}", queue_id, String::from_utf8_lossy(&message)));
        }
    }
}

#[derive(Debug, Default, serde::Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue")]
    pub queue: String,
    #[serde(default)]
    pub tick_ms: u64,
}

fn default_queue() -> String {
    "events".to_string()
}

/// 終了を保留した子コンテキストをティックで完了させるルート
pub struct ReaperRoot;

impl Context for ReaperRoot {}

impl RootContext for ReaperRoot {
    fn on_tick(&mut self) {
        let deferred: Vec<u32> = DEFERRED.with(|ids| ids.borrow_mut().drain(..).collect());
        for context_id in deferred {
            if veil_wasm_sdk::hostcalls::set_effective_context(context_id).is_ok() {
                match self.done() {
                    Ok(()) => record(format!("reaped {}", context_id)),
                    Err(err) => record(format!("reap failed: {}", err)),
                }
            }
        }
    }
}

// ====================
// HTTP コンテキスト
// ====================

/// x-trace ヘッダーの set / get / remove を観測
pub struct TraceHeader;

impl Context for TraceHeader {}

impl HttpContext for TraceHeader {
    fn on_http_request_headers(&mut self, _num_headers: usize, _end_of_stream: bool) -> Action {
        let _ = self.set_http_request_header("x-trace", Some("abc"));
        record(format!("{:?}", self.get_http_request_header("x-trace").ok().flatten()));
        let _ = self.set_http_request_header("x-trace", None);
        record(format!("{:?}", self.get_http_request_header("x-trace").ok().flatten()));
        Action::Continue
    }
}

/// 外部認可サービスへ問い合わせ、結果で再開またはローカル応答
pub struct AuthFilter {
    pub context_id: u32,
    pub pending: Option<u32>,
}

impl Context for AuthFilter {
    fn on_http_call_response(
        &mut self,
        token_id: u32,
        _num_headers: usize,
        body_size: usize,
        _num_trailers: usize,
    ) {
        record(format!("auth {} response {}", self.context_id, token_id));
        assert_eq!(self.pending.take(), Some(token_id));

        let verdict = self
            .get_http_call_response_header("x-verdict")
            .ok()
            .flatten();
        if verdict.as_deref() == Some("allow") {
            let _ = self.resume_http_request();
            return;
        }
        let body = self
            .get_http_call_response_body(0, body_size)
            .ok()
            .flatten()
            .unwrap_or_default();
        let _ = self.send_http_response(403, &[("x-denied-by", "auth")], Some(body.as_slice()));
    }
}

impl HttpContext for AuthFilter {
    fn on_http_request_headers(&mut self, _num_headers: usize, _end_of_stream: bool) -> Action {
        let path = self
            .get_http_request_header(":path")
            .ok()
            .flatten()
            .unwrap_or_default();
        match self.dispatch_http_call(
            "auth",
            &[(":method", "GET"), (":path", "/check"), ("x-original-path", path.as_str())],
            None,
            &[],
            Duration::from_secs(5),
        ) {
            Ok(token) => {
                self.pending = Some(token);
                Action::Pause
            }
            Err(err) => {
                record(format!("dispatch failed: {}", err));
                Action::Continue
            }
        }
    }
}

/// リクエストボディを終端まで保留
pub struct BufferBody;

impl Context for BufferBody {}

impl HttpContext for BufferBody {
    fn on_http_request_body(&mut self, body_size: usize, end_of_stream: bool) -> Action {
        record(format!("body {} {}", body_size, end_of_stream));
        if !end_of_stream {
            return Action::Pause;
        }
        let body = self
            .get_http_request_body(0, body_size)
            .ok()
            .flatten()
            .unwrap_or_default();
        let upper = body.to_ascii_uppercase();
        let _ = self.set_http_request_body(0, body_size, &upper);
        Action::Continue
    }
}

/// 受信時刻とホストのログレベルをリクエストヘッダーに記録
pub struct Stamp;

impl Context for Stamp {}

impl HttpContext for Stamp {
    fn on_http_request_headers(&mut self, _num_headers: usize, _end_of_stream: bool) -> Action {
        if let Ok(now) = self.get_current_time() {
            let millis = now
                .duration_since(std::time::UNIX_EPOCH)
                .map(|elapsed| elapsed.as_millis())
                .unwrap_or_default();
            let millis = millis.to_string();
            let _ = self.set_http_request_header("x-received-at", Some(millis.as_str()));
        }
        if let Ok(level) = veil_wasm_sdk::hostcalls::get_log_level() {
            let level = format!("{:?}", level);
            let _ = self.set_http_request_header("x-log-level", Some(level.as_str()));
        }
        Action::Continue
    }
}

// ====================
// ストリームコンテキスト
// ====================

/// "quit" を受けたら両方向を閉じ、終了はルートに任せる
pub struct Closer {
    pub context_id: u32,
}

impl Context for Closer {
    fn on_done(&mut self) -> bool {
        record(format!("done {}", self.context_id));
        DEFERRED.with(|ids| ids.borrow_mut().push(self.context_id));
        false
    }
}

impl StreamContext for Closer {
    fn on_downstream_data(&mut self, data_size: usize, _end_of_stream: bool) -> Action {
        let data = self
            .get_downstream_data(0, data_size)
            .ok()
            .flatten()
            .unwrap_or_default();
        if data == b"quit" {
            let _ = self.close_downstream();
            let _ = self.close_upstream();
        }
        Action::Continue
    }
}

/// 下りデータに接頭辞を付け、上りデータは改行まで保留
pub struct LineStream;

impl Context for LineStream {}

impl StreamContext for LineStream {
    fn on_new_connection(&mut self) -> Action {
        record("connected");
        Action::Continue
    }

    fn on_downstream_data(&mut self, data_size: usize, _end_of_stream: bool) -> Action {
        let _ = self.set_downstream_data(0, 0, b"> ");
        record(format!("downstream {}", data_size));
        Action::Continue
    }

    fn on_upstream_data(&mut self, data_size: usize, _end_of_stream: bool) -> Action {
        let data = self
            .get_upstream_data(0, data_size)
            .ok()
            .flatten()
            .unwrap_or_default();
        if data.ends_with(b"\n") {
            Action::Continue
        } else {
            Action::Pause
        }
    }

    fn on_downstream_close(&mut self, peer_type: PeerType) {
        record(format!("downstream closed by {:?}", peer_type));
    }

    fn on_upstream_close(&mut self, peer_type: PeerType) {
        record(format!("upstream closed by {:?}", peer_type));
    }

    fn on_log(&mut self) {
        record("stream log");
    }
}
