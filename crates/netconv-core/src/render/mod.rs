//! Command renderer
//!
//! Turns a [`DesiredState`] into the ordered CLI lines that converge (apply)
//! or reset (remove) one interface. Templates are Tera templates; the context
//! exposes the desired-state fields except credentials:
//!
//! `host`, `description`, `type`, `number`, `ipv4_address`,
//! `ipv4_address_mask`, `mtu`, `shutdown`, `service_policy_input`,
//! `service_policy_output`.
//!
//! Rendered output is split on line boundaries and every blank line is
//! dropped: a blank line is not a command and is never sent to a device.

use serde::Serialize;
use std::fmt;
use std::path::Path;
use tera::{Context, Tera};
use tracing::debug;

use crate::config::TemplateConfig;
use crate::error::{Error, Result};
use crate::model::DesiredState;

const BUILTIN_APPLY: &str = include_str!("../../templates/iosxe_interface_ethernet.cfg");
const BUILTIN_REMOVE: &str = include_str!("../../templates/iosxe_interface_ethernet_delete.cfg");

/// Which template to render
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateKind {
    /// Converge the interface onto the desired state
    Apply,
    /// Return the interface to its defaults
    Remove,
}

impl TemplateKind {
    fn template_name(&self) -> &'static str {
        match self {
            TemplateKind::Apply => "apply",
            TemplateKind::Remove => "remove",
        }
    }
}

impl fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.template_name())
    }
}

/// Template-driven command generator
#[derive(Debug, Clone)]
pub struct CommandRenderer {
    tera: Tera,
}

impl CommandRenderer {
    /// Renderer using the built-in IOS-XE templates
    pub fn builtin() -> Result<Self> {
        Self::from_sources(BUILTIN_APPLY, BUILTIN_REMOVE)
    }

    /// Renderer from in-memory template sources
    pub fn from_sources(apply: &str, remove: &str) -> Result<Self> {
        let mut tera = Tera::default();
        tera.autoescape_on(vec![]);
        tera.add_raw_template(TemplateKind::Apply.template_name(), apply)?;
        tera.add_raw_template(TemplateKind::Remove.template_name(), remove)?;
        Ok(Self { tera })
    }

    /// Load templates named by the configuration, falling back to built-ins
    pub async fn load(config: &TemplateConfig) -> Result<Self> {
        let apply = match &config.apply_path {
            Some(path) => read_template(path).await?,
            None => BUILTIN_APPLY.to_string(),
        };
        let remove = match &config.remove_path {
            Some(path) => read_template(path).await?,
            None => BUILTIN_REMOVE.to_string(),
        };
        Self::from_sources(&apply, &remove)
    }

    /// Render the command lines for `state`
    ///
    /// # Returns
    ///
    /// - `Ok(commands)`: Non-blank command lines in template order
    /// - `Err(Error::Template)`: The template failed to render
    pub fn render(&self, state: &DesiredState, kind: TemplateKind) -> Result<Vec<String>> {
        let context = Context::from_serialize(TemplateContext::from(state))?;
        let text = self.tera.render(kind.template_name(), &context)?;
        let commands = split_commands(&text);
        debug!(
            "Rendered {} template for {}: {} command(s)",
            kind,
            state.identity_key(),
            commands.len()
        );
        Ok(commands)
    }
}

async fn read_template(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path).await.map_err(|e| {
        Error::template(format!(
            "Failed to read template {}: {}",
            path.display(),
            e
        ))
    })
}

/// Split rendered text into commands, dropping blank lines
fn split_commands(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect()
}

/// Template view of a desired state; credentials are deliberately absent
#[derive(Serialize)]
struct TemplateContext<'a> {
    host: &'a str,
    description: &'a str,
    #[serde(rename = "type")]
    intf_type: &'static str,
    number: &'a str,
    ipv4_address: Option<&'a str>,
    ipv4_address_mask: Option<&'a str>,
    mtu: Option<u32>,
    shutdown: bool,
    service_policy_input: Option<&'a str>,
    service_policy_output: Option<&'a str>,
}

impl<'a> From<&'a DesiredState> for TemplateContext<'a> {
    fn from(state: &'a DesiredState) -> Self {
        Self {
            host: &state.host,
            description: &state.description,
            intf_type: state.intf_type.as_str(),
            number: &state.number,
            ipv4_address: state.ipv4_address.as_deref(),
            ipv4_address_mask: state.ipv4_address_mask.as_deref(),
            mtu: state.mtu,
            shutdown: state.shutdown,
            service_policy_input: state.service_policy_input.as_deref(),
            service_policy_output: state.service_policy_output.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Credentials, InterfaceType};
    use pretty_assertions::assert_eq;

    fn state() -> DesiredState {
        DesiredState::new("10.0.0.1:22", InterfaceType::GigabitEthernet, "0/1")
    }

    #[test]
    fn test_minimal_apply() {
        let renderer = CommandRenderer::builtin().unwrap();
        let commands = renderer.render(&state(), TemplateKind::Apply).unwrap();

        assert_eq!(
            commands,
            vec![
                "configure terminal",
                "interface GigabitEthernet0/1",
                " no shutdown",
                "end",
            ]
        );
    }

    #[test]
    fn test_full_apply() {
        let renderer = CommandRenderer::builtin().unwrap();
        let full = state()
            .with_description("core uplink")
            .with_ipv4("192.0.2.1", "255.255.255.0")
            .with_mtu(9000)
            .with_shutdown(true)
            .with_service_policies(Some("POLICE-IN".into()), Some("SHAPE-OUT".into()));

        let commands = renderer.render(&full, TemplateKind::Apply).unwrap();

        assert_eq!(
            commands,
            vec![
                "configure terminal",
                "interface GigabitEthernet0/1",
                " description core uplink",
                " ip address 192.0.2.1 255.255.255.0",
                " mtu 9000",
                " service-policy input POLICE-IN",
                " service-policy output SHAPE-OUT",
                " shutdown",
                "end",
            ]
        );
    }

    #[test]
    fn test_absent_fields_never_rendered() {
        let renderer = CommandRenderer::builtin().unwrap();
        let commands = renderer.render(&state(), TemplateKind::Apply).unwrap();

        for command in &commands {
            assert!(!command.trim().is_empty());
            assert!(!command.contains("ip address"));
            assert!(!command.contains("mtu"));
            assert!(!command.contains("service-policy"));
            assert!(!command.contains("description"));
        }
    }

    #[test]
    fn test_no_blank_lines_for_any_interface_type() {
        let renderer = CommandRenderer::builtin().unwrap();
        for intf_type in InterfaceType::ALL {
            let state = DesiredState::new("10.0.0.1:22", intf_type, "1/0/1").with_mtu(1500);
            for kind in [TemplateKind::Apply, TemplateKind::Remove] {
                let commands = renderer.render(&state, kind).unwrap();
                assert!(commands.iter().all(|c| !c.trim().is_empty()));
                assert!(commands.iter().any(|c| c.contains(intf_type.as_str())));
            }
        }
    }

    #[test]
    fn test_remove_template() {
        let renderer = CommandRenderer::builtin().unwrap();
        let commands = renderer
            .render(&state().with_mtu(9000), TemplateKind::Remove)
            .unwrap();
        assert_eq!(
            commands,
            vec![
                "configure terminal",
                "default interface GigabitEthernet0/1",
                "end"
            ]
        );
    }

    #[test]
    fn test_credentials_not_in_context() {
        let renderer =
            CommandRenderer::from_sources("user {{ username }}", "remove").unwrap();
        let state = state().with_credentials(Credentials::new("netops", "secret"));
        assert!(matches!(
            renderer.render(&state, TemplateKind::Apply),
            Err(Error::Template(_))
        ));
    }

    #[test]
    fn test_malformed_template_is_template_error() {
        let result = CommandRenderer::from_sources("interface {{ type ", "end");
        assert!(matches!(result, Err(Error::Template(_))));
    }

    #[test]
    fn test_split_commands_trims_and_drops_blank_lines() {
        let commands = split_commands("a  \r\n\n   \n b\n\nc");
        assert_eq!(commands, vec!["a", " b", "c"]);
    }

    #[tokio::test]
    async fn test_load_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let apply = dir.path().join("apply.cfg");
        tokio::fs::write(&apply, "interface {{ type }}{{ number }}\n\n mtu {{ mtu }}\n")
            .await
            .unwrap();

        let config = TemplateConfig {
            apply_path: Some(apply),
            remove_path: None,
        };
        let renderer = CommandRenderer::load(&config).await.unwrap();
        let commands = renderer
            .render(&state().with_mtu(1400), TemplateKind::Apply)
            .unwrap();
        assert_eq!(commands, vec!["interface GigabitEthernet0/1", " mtu 1400"]);

        let missing = TemplateConfig {
            apply_path: Some(dir.path().join("missing.cfg")),
            remove_path: None,
        };
        assert!(matches!(
            CommandRenderer::load(&missing).await,
            Err(Error::Template(_))
        ));
    }
}
