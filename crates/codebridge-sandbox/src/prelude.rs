//! Runners injected ahead of agent code, and the result-line protocol.
//!
//! The runner travels on the interpreter command line (`python3 -c`,
//! `node -e`), so agent code cannot alter it. stdin carries a one-line JSON
//! header `{nonce, token, socket}` followed by the agent source. The runner
//! exposes exactly `invokeCapability`, `listCapabilities` and
//! `describeCapability`, runs the source as a function body and prints one
//! result line prefixed with the nonce marker.
//!
//! Python agent code is the body of a generated function, which is what lets
//! a top-level `return` set the result. Module-only syntax is therefore
//! rejected: `from m import *` raises `SyntaxError` (reported as
//! `RuntimeException: SyntaxError: ...`); use `import m` or explicit names.
//! Top-level assignments are function locals, so `global` declarations in
//! nested functions do not see them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::runtime_resolver::Language;

pub const PYTHON_RUNNER: &str = r#"
import ast, http.client, json, socket, sys, traceback

def __codebridge_run():
    header = json.loads(sys.stdin.readline())
    source = sys.stdin.read()
    marker = "__CODEBRIDGE_RESULT_" + header["nonce"] + "__"
    token = header["token"]
    sock_path = header["socket"]

    def emit(payload):
        sys.stdout.write(marker + json.dumps(payload) + "\n")
        sys.stdout.flush()

    class _UnixConnection(http.client.HTTPConnection):
        def connect(self):
            s = socket.socket(socket.AF_UNIX, socket.SOCK_STREAM)
            s.connect(sock_path)
            self.sock = s

    def _call(tool, payload):
        body = json.dumps({"authToken": token, "toolName": tool, "input": payload})
        conn = _UnixConnection("bridge")
        try:
            conn.request("POST", "/invoke", body=body, headers={"Content-Type": "application/json"})
            reply = json.loads(conn.getresponse().read().decode("utf-8"))
        finally:
            conn.close()
        if not reply.get("success"):
            raise RuntimeError(reply.get("error") or "capability call failed")
        return reply.get("result")

    def invokeCapability(name, input=None):
        return _call(name, {} if input is None else input)

    def listCapabilities():
        return _call("list_capabilities", {})

    def describeCapability(name):
        return _call("describe_capability", {"name": name})

    namespace = {
        "__name__": "__agent__",
        "invokeCapability": invokeCapability,
        "listCapabilities": listCapabilities,
        "describeCapability": describeCapability,
    }
    try:
        tree = ast.parse(source, "<agent>", "exec")
        wrapper = ast.parse("def __agent_main__():\n    pass\n", "<agent>", "exec")
        wrapper.body[0].body = tree.body or [ast.Pass()]
        ast.fix_missing_locations(wrapper)
        exec(compile(wrapper, "<agent>", "exec"), namespace)
        result = namespace["__agent_main__"]()
    except SystemExit as e:
        if e.code in (None, 0):
            result = None
        else:
            emit({"ok": False, "kind": "SystemExit", "error": "exit status %s" % e.code})
            sys.exit(1)
    except MemoryError:
        emit({"ok": False, "kind": "MemoryError", "error": "out of memory"})
        sys.exit(1)
    except BaseException as e:
        traceback.print_exc()
        emit({"ok": False, "kind": type(e).__name__, "error": str(e)})
        sys.exit(1)
    try:
        line = json.dumps({"ok": True, "output": result})
    except (TypeError, ValueError) as e:
        emit({"ok": False, "kind": "TypeError", "error": "return value is not JSON-serialisable: %s" % e})
        sys.exit(1)
    sys.stdout.write(marker + line + "\n")
    sys.stdout.flush()

__codebridge_run()
"#;

pub const NODE_RUNNER: &str = r#"
'use strict';
const http = require('http');
let raw = '';
process.stdin.setEncoding('utf8');
process.stdin.on('data', (chunk) => { raw += chunk; });
process.stdin.on('end', () => { run(); });

async function run() {
  const nl = raw.indexOf('\n');
  const header = JSON.parse(nl < 0 ? raw : raw.slice(0, nl));
  const source = nl < 0 ? '' : raw.slice(nl + 1);
  const marker = '__CODEBRIDGE_RESULT_' + header.nonce + '__';
  const emit = (payload) => process.stdout.write(marker + JSON.stringify(payload) + '\n');

  const call = (toolName, input) => new Promise((resolve, reject) => {
    const body = JSON.stringify({
      authToken: header.token,
      toolName,
      input: input === undefined || input === null ? {} : input,
    });
    const req = http.request({
      socketPath: header.socket,
      path: '/invoke',
      method: 'POST',
      headers: { 'Content-Type': 'application/json', 'Content-Length': Buffer.byteLength(body) },
    }, (res) => {
      let data = '';
      res.setEncoding('utf8');
      res.on('data', (c) => { data += c; });
      res.on('end', () => {
        let reply;
        try { reply = JSON.parse(data); } catch (e) { reject(new Error('invalid bridge response')); return; }
        if (reply.success) resolve(reply.result === undefined ? null : reply.result);
        else reject(new Error(reply.error || 'capability call failed'));
      });
    });
    req.on('error', reject);
    req.end(body);
  });

  const invokeCapability = (name, input) => call(name, input);
  const listCapabilities = () => call('list_capabilities', {});
  const describeCapability = (name) => call('describe_capability', { name });

  const AsyncFunction = Object.getPrototypeOf(async function () {}).constructor;
  let result;
  try {
    const fn = new AsyncFunction('invokeCapability', 'listCapabilities', 'describeCapability', source);
    result = await fn(invokeCapability, listCapabilities, describeCapability);
  } catch (e) {
    if (e && e.stack) process.stderr.write(String(e.stack) + '\n');
    emit({ ok: false, kind: (e && e.name) || 'Error', error: (e && e.message) || String(e) });
    process.exitCode = 1;
    return;
  }
  let line;
  try {
    line = JSON.stringify({ ok: true, output: result === undefined ? null : result });
  } catch (e) {
    emit({ ok: false, kind: 'TypeError', error: 'return value is not JSON-serialisable: ' + e.message });
    process.exitCode = 1;
    return;
  }
  process.stdout.write(marker + line + '\n');
}
"#;

/// Interpreter arguments that load the runner for `language`.
pub fn runner_args(language: Language, max_memory_mb: u64) -> Vec<String> {
    match language {
        Language::Python => vec![
            "-I".to_string(),
            "-u".to_string(),
            "-c".to_string(),
            PYTHON_RUNNER.to_string(),
        ],
        Language::Node => vec![
            format!("--max-old-space-size={}", max_memory_mb.max(16)),
            "-e".to_string(),
            NODE_RUNNER.to_string(),
        ],
    }
}

pub fn result_marker(nonce: &str) -> String {
    format!("__CODEBRIDGE_RESULT_{}__", nonce)
}

/// First stdin line handed to the runner.
#[derive(Debug, Clone, Serialize)]
pub struct RunnerHeader<'a> {
    pub nonce: &'a str,
    pub token: &'a str,
    pub socket: &'a str,
}

/// Decoded result line.
#[derive(Debug, Clone, PartialEq)]
pub enum RunnerOutcome {
    Returned(Option<Value>),
    Raised { kind: String, message: String },
}

#[derive(Deserialize)]
struct RawOutcome {
    ok: bool,
    #[serde(default)]
    output: Value,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Split a line at the marker: `(text before, payload after)`.
pub fn split_marker<'a>(line: &'a str, marker: &str) -> Option<(&'a str, &'a str)> {
    let idx = line.find(marker)?;
    Some((&line[..idx], &line[idx + marker.len()..]))
}

pub fn parse_outcome(payload: &str) -> Option<RunnerOutcome> {
    let raw: RawOutcome = serde_json::from_str(payload.trim()).ok()?;
    if raw.ok {
        let output = match raw.output {
            Value::Null => None,
            v => Some(v),
        };
        Some(RunnerOutcome::Returned(output))
    } else {
        Some(RunnerOutcome::Raised {
            kind: raw.kind.unwrap_or_else(|| "Error".to_string()),
            message: raw.error.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_split_marker_keeps_prefix() {
        let m = result_marker("abc");
        let line = format!("partial print{}{{\"ok\":true,\"output\":1}}", m);
        let (before, payload) = split_marker(&line, &m).unwrap();
        assert_eq!(before, "partial print");
        assert_eq!(parse_outcome(payload), Some(RunnerOutcome::Returned(Some(json!(1)))));
        assert!(split_marker("plain log", &m).is_none());
    }

    #[test]
    fn test_parse_outcomes() {
        assert_eq!(
            parse_outcome(r#"{"ok":true,"output":null}"#),
            Some(RunnerOutcome::Returned(None))
        );
        assert_eq!(
            parse_outcome(r#"{"ok":false,"kind":"ValueError","error":"bad"}"#),
            Some(RunnerOutcome::Raised {
                kind: "ValueError".into(),
                message: "bad".into()
            })
        );
        assert_eq!(parse_outcome("not json"), None);
    }

    #[test]
    fn test_runners_expose_exactly_three_functions() {
        for name in ["invokeCapability", "listCapabilities", "describeCapability"] {
            assert!(PYTHON_RUNNER.contains(&format!("\"{}\": {}", name, name)));
            assert!(NODE_RUNNER.contains(&format!("'{}'", name)));
        }
        assert_eq!(runner_args(Language::Node, 128)[0], "--max-old-space-size=128");
        assert_eq!(runner_args(Language::Python, 128)[..3], ["-I", "-u", "-c"]);
    }
}
