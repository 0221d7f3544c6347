//! Text exposition format.
//!
//! Per metric, in registration order: `# HELP`, `# TYPE`, then one line per
//! series in encounter order. Label pairs are already sorted by key inside
//! `LabelSet`, so an unchanged set renders byte-identically every time.

use std::fmt::Write;

use crate::metric::MetricSet;

/// Content type served alongside `render_text` output.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

fn escape_help(v: &str) -> String {
    v.replace('\\', "\\\\").replace('\n', "\\n")
}

pub fn render_text(set: &MetricSet) -> String {
    let mut out = String::new();
    for m in set.metrics() {
        let _ = writeln!(out, "# HELP {} {}", m.name(), escape_help(m.help()));
        let _ = writeln!(out, "# TYPE {} {}", m.name(), m.kind().as_str());
        for (labels, value) in m.values() {
            let _ = writeln!(out, "{}{} {}", m.name(), labels, value);
        }
    }
    out
}
