use std::net::Ipv4Addr;

use crate::error::TartbootError;

/// Values available to boot command placeholders.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootContext {
    pub host_ip: Option<Ipv4Addr>,
    pub http_port: u16,
}

/// Substitute `{{ .HTTPIP }}` and `{{ .HTTPPort }}` in `template`.
///
/// A placeholder whose value is unknown is an error, as is any other
/// placeholder or an unterminated `{{`.
pub fn render(template: &str, ctx: &BootContext) -> Result<String, TartbootError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find("}}").ok_or_else(|| TartbootError::Template {
            message: format!("unterminated `{{{{` at offset {}", template.len() - rest.len() + start),
        })?;

        match after[..end].trim() {
            ".HTTPIP" => {
                let ip = ctx.host_ip.ok_or_else(|| TartbootError::Template {
                    message: "`{{ .HTTPIP }}` is used but no host address was resolved".into(),
                })?;
                out.push_str(&ip.to_string());
            }
            ".HTTPPort" => {
                if ctx.http_port == 0 {
                    return Err(TartbootError::Template {
                        message: "`{{ .HTTPPort }}` is used but network.http_port is not set".into(),
                    });
                }
                out.push_str(&ctx.http_port.to_string());
            }
            other => {
                return Err(TartbootError::Template {
                    message: format!("unknown placeholder `{{{{ {other} }}}}`"),
                });
            }
        }
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    Ok(out)
}
