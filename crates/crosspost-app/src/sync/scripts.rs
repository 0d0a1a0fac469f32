//! Page scripts evaluated inside rendering surfaces
//!
//! Every script starts with a `/*crosspost:<kind>*/` marker and receives its
//! arguments as a JSON literal, so no caller-controlled text is ever spliced
//! into JavaScript source unescaped.

use serde_json::{json, Value};

use crosspost_core::{BodyFormat, ContentPayload, EditorTargets, PolicyStep, ReadinessSignal};

pub const READY_MARKER: &str = "/*crosspost:ready*/";
pub const STEP_MARKER: &str = "/*crosspost:step*/";
pub const NATIVE_MARKER: &str = "/*crosspost:native*/";
pub const PASTE_MARKER: &str = "/*crosspost:paste*/";
pub const IMPORT_MARKER: &str = "/*crosspost:import*/";
pub const VERIFY_MARKER: &str = "/*crosspost:verify*/";

fn with_args(marker: &str, body: &str, args: &Value) -> String {
    format!("{marker}({body})({args})")
}

/// `true` once the document and the readiness signal are both in place
pub fn readiness(signal: &ReadinessSignal) -> String {
    let args = json!({
        "selector": signal.selector,
        "global": signal.global,
    });
    with_args(
        READY_MARKER,
        r#"(args) => {
  if (document.readyState !== 'complete') return false;
  if (args.selector && !document.querySelector(args.selector)) return false;
  if (args.global) {
    let value = window;
    for (const key of args.global.split('.')) {
      if (value == null) return false;
      value = value[key];
    }
    if (!value) return false;
  }
  return true;
}"#,
        &args,
    )
}

/// Script for a pre-injection step; `Delay` runs host-side and has none
pub fn policy_step(step: &PolicyStep) -> Option<String> {
    let script = match step {
        PolicyStep::ClickIfPresent { selector, text } => with_args(
            STEP_MARKER,
            r#"(args) => {
  const candidates = Array.from(document.querySelectorAll(args.selector))
    .filter((el) => !args.text || (el.textContent || '').includes(args.text));
  if (candidates.length === 0) return { ok: true, clicked: false };
  candidates.sort((a, b) => (a.textContent || '').length - (b.textContent || '').length);
  candidates[0].click();
  return { ok: true, clicked: true };
}"#,
            &json!({ "kind": "click", "selector": selector, "text": text }),
        ),
        PolicyStep::ConfirmDialog {
            container,
            buttons,
            timeout_ms,
        } => with_args(
            STEP_MARKER,
            r#"async (args) => {
  const sleep = (ms) => new Promise((r) => setTimeout(r, ms));
  const deadline = Date.now() + args.timeout;
  while (Date.now() < deadline) {
    for (const box of document.querySelectorAll(args.container)) {
      const buttons = Array.from(box.querySelectorAll('button, a, span'));
      for (const label of args.buttons) {
        const hit = buttons.find((b) => (b.textContent || '').trim() === label);
        if (hit) { hit.click(); return { ok: true, clicked: true }; }
      }
    }
    await sleep(200);
  }
  return { ok: true, clicked: false };
}"#,
            &json!({
                "kind": "confirm",
                "container": container,
                "buttons": buttons,
                "timeout": timeout_ms,
            }),
        ),
        PolicyStep::WaitFor {
            selector,
            timeout_ms,
        } => with_args(
            STEP_MARKER,
            r#"async (args) => {
  const sleep = (ms) => new Promise((r) => setTimeout(r, ms));
  const deadline = Date.now() + args.timeout;
  while (Date.now() < deadline) {
    if (document.querySelector(args.selector)) return { ok: true };
    await sleep(200);
  }
  return { ok: false, detail: 'timed out waiting for ' + args.selector };
}"#,
            &json!({ "kind": "wait_for", "selector": selector, "timeout": timeout_ms }),
        ),
        PolicyStep::Delay { .. } => return None,
    };
    Some(script)
}

const SET_VALUE_HELPER: &str = r#"
  const setValue = (el, value, asHtml) => {
    const host = el.closest ? el.closest('.CodeMirror') : null;
    const cm = el.CodeMirror || (host && host.CodeMirror);
    if (cm && typeof cm.setValue === 'function') {
      cm.setValue(value);
      return;
    }
    if (el instanceof HTMLInputElement || el instanceof HTMLTextAreaElement) {
      const proto = el instanceof HTMLInputElement
        ? HTMLInputElement.prototype
        : HTMLTextAreaElement.prototype;
      Object.getOwnPropertyDescriptor(proto, 'value').set.call(el, value);
    } else if (asHtml) {
      el.innerHTML = value;
    } else {
      el.textContent = value;
    }
    el.dispatchEvent(new Event('input', { bubbles: true }));
    el.dispatchEvent(new Event('change', { bubbles: true }));
  };
"#;

fn native_body(payload: &ContentPayload, format: BodyFormat) -> &str {
    match format {
        BodyFormat::Markdown => payload.plain_body(),
        BodyFormat::Html => payload.body_html.as_deref().unwrap_or_else(|| payload.paste_html()),
    }
}

/// Set title and body through the elements' own value setters
pub fn native_set(targets: &EditorTargets, format: BodyFormat, payload: &ContentPayload) -> String {
    let args = json!({
        "title": targets.title,
        "body": targets.body,
        "titleValue": payload.title,
        "bodyValue": native_body(payload, format),
        "html": format == BodyFormat::Html,
    });
    let body = format!(
        r#"(args) => {{{SET_VALUE_HELPER}
  let titleSet = false;
  if (args.title) {{
    const title = document.querySelector(args.title);
    if (title) {{ setValue(title, args.titleValue, false); titleSet = true; }}
  }}
  const editor = document.querySelector(args.body);
  if (!editor) return {{ ok: false, detail: 'editor not found: ' + args.body }};
  setValue(editor, args.bodyValue, args.html);
  return {{ ok: true, titleSet }};
}}"#
    );
    with_args(NATIVE_MARKER, &body, &args)
}

/// Set the title natively, then paste the body as a synthetic clipboard event
pub fn clipboard_paste(targets: &EditorTargets, payload: &ContentPayload) -> String {
    let args = json!({
        "title": targets.title,
        "body": targets.body,
        "titleValue": payload.title,
        "html": payload.paste_html(),
        "text": payload.plain_body(),
    });
    let body = format!(
        r#"(args) => {{{SET_VALUE_HELPER}
  let titleSet = false;
  if (args.title) {{
    const title = document.querySelector(args.title);
    if (title) {{ setValue(title, args.titleValue, false); titleSet = true; }}
  }}
  const editor = document.querySelector(args.body);
  if (!editor) return {{ ok: false, detail: 'editor not found: ' + args.body }};
  editor.focus();
  const data = new DataTransfer();
  data.setData('text/html', args.html);
  data.setData('text/plain', args.text);
  editor.dispatchEvent(new ClipboardEvent('paste', {{
    clipboardData: data, bubbles: true, cancelable: true,
  }}));
  return {{ ok: true, titleSet }};
}}"#
    );
    with_args(PASTE_MARKER, &body, &args)
}

/// Hand the markdown to a file input as `<sanitized title>.md`
pub fn file_import(input: &str, drop_target: Option<&str>, payload: &ContentPayload) -> String {
    let args = json!({
        "input": input,
        "drop": drop_target,
        "name": payload.import_file_name(),
        "markdown": payload.plain_body(),
    });
    with_args(
        IMPORT_MARKER,
        r#"(args) => {
  const input = document.querySelector(args.input);
  if (!input) return { ok: false, detail: 'file input not found: ' + args.input };
  const file = new File([args.markdown], args.name, { type: 'text/markdown' });
  const data = new DataTransfer();
  data.items.add(file);
  input.files = data.files;
  input.dispatchEvent(new Event('change', { bubbles: true }));
  if (args.drop) {
    const target = document.querySelector(args.drop);
    if (target) {
      target.dispatchEvent(new DragEvent('drop', {
        dataTransfer: data, bubbles: true, cancelable: true,
      }));
    }
  }
  return { ok: true };
}"#,
        &args,
    )
}

/// Length of the content currently in `selector`, 0 when missing
pub fn content_length(selector: &str) -> String {
    with_args(
        VERIFY_MARKER,
        r#"(args) => {
  const el = document.querySelector(args.selector);
  if (!el) return 0;
  const host = el.closest ? el.closest('.CodeMirror') : null;
  const cm = el.CodeMirror || (host && host.CodeMirror);
  if (cm && typeof cm.getValue === 'function') return cm.getValue().trim().length;
  if (typeof el.value === 'string') return el.value.trim().length;
  return (el.innerText || el.textContent || '').trim().length;
}"#,
        &json!({ "selector": selector }),
    )
}

/// Interpret an `{ ok, detail }` script answer
pub fn check_ok(value: &Value) -> std::result::Result<(), String> {
    match value.get("ok").and_then(Value::as_bool) {
        Some(true) => Ok(()),
        Some(false) => Err(value
            .get("detail")
            .and_then(Value::as_str)
            .unwrap_or("script reported failure")
            .to_string()),
        None => Err(format!("unexpected script result: {value}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> ContentPayload {
        ContentPayload::new("Hello \"world\"</script>")
            .with_markdown("# Hi\n\n`code`")
            .with_html("<h1>Hi</h1>")
    }

    fn args_of(script: &str) -> Value {
        let start = script.rfind(")(").unwrap() + 2;
        serde_json::from_str(&script[start..script.len() - 1]).unwrap()
    }

    #[test]
    fn test_markers_lead_every_script() {
        let targets = EditorTargets::new(Some("#title"), ".editor");
        assert!(readiness(&ReadinessSignal::selector(".editor")).starts_with(READY_MARKER));
        assert!(native_set(&targets, BodyFormat::Markdown, &payload()).starts_with(NATIVE_MARKER));
        assert!(clipboard_paste(&targets, &payload()).starts_with(PASTE_MARKER));
        assert!(file_import("input", None, &payload()).starts_with(IMPORT_MARKER));
        assert!(content_length(".editor").starts_with(VERIFY_MARKER));
    }

    #[test]
    fn test_args_are_json_encoded() {
        let targets = EditorTargets::new(Some("#title"), ".editor");
        let script = native_set(&targets, BodyFormat::Markdown, &payload());
        let args = args_of(&script);
        assert_eq!(args["titleValue"], "Hello \"world\"</script>");
        assert_eq!(args["bodyValue"], "# Hi\n\n`code`");
        assert_eq!(args["html"], false);
    }

    #[test]
    fn test_native_html_format_uses_html_body() {
        let targets = EditorTargets::new(None, ".ProseMirror");
        let args = args_of(&native_set(&targets, BodyFormat::Html, &payload()));
        assert_eq!(args["bodyValue"], "<h1>Hi</h1>");
        assert_eq!(args["title"], Value::Null);
    }

    #[test]
    fn test_paste_prefers_clipboard_html() {
        let targets = EditorTargets::new(None, ".ProseMirror");
        let rich = payload().with_clipboard_html("<section>styled</section>");
        let args = args_of(&clipboard_paste(&targets, &rich));
        assert_eq!(args["html"], "<section>styled</section>");
        assert_eq!(args["text"], "# Hi\n\n`code`");
    }

    #[test]
    fn test_import_uses_sanitized_name() {
        let args = args_of(&file_import("input[type=file]", Some(".modal"), &payload()));
        assert_eq!(args["name"], "Hello _world___script_.md");
        assert_eq!(args["drop"], ".modal");
    }

    #[test]
    fn test_delay_has_no_script() {
        assert!(policy_step(&PolicyStep::delay(100)).is_none());
        let click = policy_step(&PolicyStep::click("button", Some("导入"))).unwrap();
        assert!(click.starts_with(STEP_MARKER));
        assert_eq!(args_of(&click)["text"], "导入");
    }

    #[test]
    fn test_check_ok() {
        assert!(check_ok(&json!({"ok": true})).is_ok());
        assert_eq!(
            check_ok(&json!({"ok": false, "detail": "editor not found"})).unwrap_err(),
            "editor not found"
        );
        assert!(check_ok(&Value::Null).is_err());
    }
}
