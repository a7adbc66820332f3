//! Output transforms
//!
//! Pure parsers turning raw container-runtime text into payloads. They never
//! fail: a malformed line yields a partially populated record.

use std::fmt;
use std::sync::{Arc, OnceLock};

use regex_lite::Regex;

use super::{KernelRecord, KernelStatus};
use crate::core::Payload;

/// Separator between fields in `--format` output
pub const FIELD_SEPARATOR: char = '|';

/// Go template for a single kernel lookup: id, status, ports
pub const KERNEL_FORMAT: &str = "{{.ID}}|{{.Status}}|{{.Ports}}";

/// Go template for a kernel listing: id, status, image, ports
pub const KERNEL_LIST_FORMAT: &str = "{{.ID}}|{{.Status}}|{{.Image}}|{{.Ports}}";

fn port_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r":(\d+)->").expect("Invalid port regex"))
}

/// Map a human readable status ("Up 2 hours", "Exited (0) 3 minutes ago")
/// to a kernel status
pub fn normalize_status(raw: &str) -> KernelStatus {
    if raw.contains("Up") {
        KernelStatus::Running
    } else if raw.contains("Exit") {
        KernelStatus::Exited
    } else {
        KernelStatus::Pending
    }
}

/// Extract the first published host port from a port mapping such as
/// `0.0.0.0:9999->8888/tcp`
pub fn extract_port(raw: &str) -> Option<u16> {
    let captures = port_regex().captures(raw)?;
    captures.get(1)?.as_str().parse().ok()
}

/// Parse `id|status|ports` output of a single-kernel lookup.
///
/// The image is not part of the output; the one used for the lookup is echoed.
pub fn parse_kernel(output: &str, image: &str) -> KernelRecord {
    let line = output.lines().next().unwrap_or("").trim_end_matches('\r');
    let mut fields = line.split(FIELD_SEPARATOR);
    let id = fields.next().unwrap_or("");
    let status = fields.next().unwrap_or("");
    let ports = fields.next().unwrap_or("");

    KernelRecord {
        id: id.to_string(),
        status: normalize_status(status),
        image: image.to_string(),
        port: extract_port(ports),
    }
}

/// Parse `id|status|image|ports` lines of a kernel listing. Blank lines are
/// skipped.
pub fn parse_kernels(output: &str) -> Vec<KernelRecord> {
    output
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.is_empty())
        .map(|line| {
            let mut fields = line.split(FIELD_SEPARATOR);
            let id = fields.next().unwrap_or("");
            let status = fields.next().unwrap_or("");
            let image = fields.next().unwrap_or("");
            let ports = fields.next().unwrap_or("");

            KernelRecord {
                id: id.to_string(),
                status: normalize_status(status),
                image: image.to_string(),
                port: extract_port(ports),
            }
        })
        .collect()
}

/// Caller supplied transform
pub type TransformFn = Arc<dyn Fn(&str) -> Option<Payload> + Send + Sync>;

/// How buffered stdout of a run-to-completion command becomes a payload
#[derive(Clone, Default)]
pub enum OutputTransform {
    /// Trimmed text, `{text}`
    #[default]
    Text,
    /// Single kernel lookup for the given image, `{kernel}`
    Kernel { image: String },
    /// Kernel listing, `{kernels}`
    KernelList,
    /// No payload; completion is the whole result
    Empty,
    Custom(TransformFn),
}

impl OutputTransform {
    pub fn apply(&self, raw: &str) -> Option<Payload> {
        match self {
            OutputTransform::Text => Some(Payload::text(raw.trim())),
            OutputTransform::Kernel { image } => Some(Payload::Kernel {
                kernel: parse_kernel(raw, image),
            }),
            OutputTransform::KernelList => Some(Payload::KernelList {
                kernels: parse_kernels(raw),
            }),
            OutputTransform::Empty => None,
            OutputTransform::Custom(f) => f(raw),
        }
    }
}

impl fmt::Debug for OutputTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputTransform::Text => f.write_str("Text"),
            OutputTransform::Kernel { image } => f.debug_struct("Kernel").field("image", image).finish(),
            OutputTransform::KernelList => f.write_str("KernelList"),
            OutputTransform::Empty => f.write_str("Empty"),
            OutputTransform::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_status() {
        assert_eq!(normalize_status("Up 2 hours"), KernelStatus::Running);
        assert_eq!(normalize_status("Up 5 seconds (healthy)"), KernelStatus::Running);
        assert_eq!(normalize_status("Exited (0) 3 minutes ago"), KernelStatus::Exited);
        assert_eq!(normalize_status("Created"), KernelStatus::Pending);
        assert_eq!(normalize_status(""), KernelStatus::Pending);
    }

    #[test]
    fn test_extract_port() {
        assert_eq!(extract_port("0.0.0.0:9999->8888/tcp"), Some(9999));
        assert_eq!(
            extract_port("0.0.0.0:8000->8888/tcp, :::8000->8888/tcp"),
            Some(8000)
        );
        assert_eq!(extract_port("8888/tcp"), None);
        assert_eq!(extract_port(""), None);
        assert_eq!(extract_port("0.0.0.0:99999->8888/tcp"), None);
    }

    #[test]
    fn test_parse_kernel() {
        let kernel = parse_kernel(
            "3f2a|Up 2 hours|0.0.0.0:9999->8888/tcp\n",
            "jupyter/base-notebook",
        );
        assert_eq!(kernel.id, "3f2a");
        assert_eq!(kernel.status, KernelStatus::Running);
        assert_eq!(kernel.image, "jupyter/base-notebook");
        assert_eq!(kernel.port, Some(9999));
    }

    #[test]
    fn test_parse_kernel_empty_output() {
        let kernel = parse_kernel("", "img");
        assert_eq!(kernel.id, "");
        assert_eq!(kernel.status, KernelStatus::Pending);
        assert_eq!(kernel.image, "img");
        assert_eq!(kernel.port, None);
    }

    #[test]
    fn test_parse_kernels() {
        let kernels = parse_kernels(
            "id1|Up 1 min|imgA|0.0.0.0:9999->8888/tcp\nid2|Exited (1)|imgB|\n",
        );

        assert_eq!(kernels.len(), 2);
        assert_eq!(kernels[0].image, "imgA");
        assert_eq!(kernels[0].status, KernelStatus::Running);
        assert_eq!(kernels[0].port, Some(9999));
        assert_eq!(kernels[1].image, "imgB");
        assert_eq!(kernels[1].status, KernelStatus::Exited);
        assert_eq!(kernels[1].port, None);
    }

    #[test]
    fn test_parse_kernels_blank_and_crlf_lines() {
        assert!(parse_kernels("").is_empty());
        assert!(parse_kernels("\n\n").is_empty());

        let kernels = parse_kernels("id1|Up|imgA|\r\n\r\n");
        assert_eq!(kernels.len(), 1);
        assert_eq!(kernels[0].image, "imgA");
    }

    #[test]
    fn test_parse_kernels_missing_fields() {
        let kernels = parse_kernels("lonely-id\n");
        assert_eq!(kernels.len(), 1);
        assert_eq!(kernels[0].id, "lonely-id");
        assert_eq!(kernels[0].status, KernelStatus::Pending);
        assert_eq!(kernels[0].image, "");
        assert_eq!(kernels[0].port, None);
    }

    #[test]
    fn test_transforms() {
        assert_eq!(
            OutputTransform::Text.apply("  hello\n"),
            Some(Payload::text("hello"))
        );
        assert_eq!(OutputTransform::Empty.apply("abc\n"), None);

        let custom = OutputTransform::Custom(Arc::new(|raw| Some(Payload::text(raw.to_uppercase()))));
        assert_eq!(custom.apply("up"), Some(Payload::text("UP")));

        match OutputTransform::KernelList.apply("a|Up|i|\n") {
            Some(Payload::KernelList { kernels }) => assert_eq!(kernels.len(), 1),
            other => panic!("unexpected payload: {:?}", other),
        }
    }
}
