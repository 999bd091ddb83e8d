//! TwiML document emitter.
//!
//! The answer URL for every call returns a `<Connect><Stream>` document
//! pointing Twilio's media stream at one of our WebSocket endpoints.
//! Custom parameters ride along as `<Parameter>` elements and come back
//! verbatim in the stream's `start` frame.

/// Escape a string for use in an XML attribute value.
fn escape_xml(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// TwiML connecting the call to a media-stream endpoint with parameters.
pub fn stream_twiml(ws_url: &str, parameters: &[(&str, &str)]) -> String {
    let mut params_xml = String::new();
    for (name, value) in parameters {
        if value.is_empty() {
            continue;
        }
        params_xml.push_str(&format!(
            "\n      <Parameter name=\"{}\" value=\"{}\" />",
            escape_xml(name),
            escape_xml(value)
        ));
    }

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Response>
  <Connect>
    <Stream url="{}">{}
    </Stream>
  </Connect>
</Response>"#,
        escape_xml(ws_url),
        params_xml
    )
}
