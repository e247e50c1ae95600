//! HTML index page listing the configured streams.

use axum::extract::State;
use axum::response::{Html, IntoResponse};
use std::fmt::Write;

use crate::context::AppContext;

/// GET / -- a minimal landing page with per-stream playback links.
///
/// The tz parameter is filled client-side from the browser's own zone, so
/// the copied links already carry the listener's timezone.
pub async fn index(State(ctx): State<AppContext>) -> impl IntoResponse {
    let mut rows = String::new();
    for s in &ctx.config.streams {
        write!(
            rows,
            r#"<li><strong>{name}</strong> &mdash; <a class="pl" href="/m3u8?stream={id}">playlist</a> | <a class="pl" href="/icecast?stream={id}">icecast</a></li>"#,
            name = s.name,
            id = s.id,
        )
        .expect("writing to string");
    }

    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head><title>shiftcast</title></head>
<body>
<h1>shiftcast</h1>
<p>Live radio, replayed at your local hour.</p>
<ul>{rows}</ul>
<script>
  const tz = Intl.DateTimeFormat().resolvedOptions().timeZone;
  document.querySelectorAll('a.pl').forEach(a => {{
    a.href = a.href + '&tz=' + encodeURIComponent(tz);
  }});
</script>
</body>
</html>
"#
    ))
}
