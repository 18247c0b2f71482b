//! Translation between berth container types and Docker Engine API models.

use std::collections::HashMap;

use bollard::container::Config;
use bollard::models::{
    ContainerSummary as EngineSummary, HostConfig, PortBinding, PortTypeEnum, RestartPolicy,
    RestartPolicyNameEnum,
};

use crate::{ContainerSpec, ContainerState, ContainerSummary, PortMapping};

/// Engine key for a TCP container port, e.g. `8080/tcp`.
pub fn port_key(container_port: u16) -> String {
    format!("{container_port}/tcp")
}

/// Build the create-container body for `spec`.
///
/// The container keeps a TTY and open stdin so shell-only images stay alive,
/// and restarts with the engine unless it was explicitly stopped.
pub fn container_config(spec: &ContainerSpec) -> Config<String> {
    let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
        .ports
        .keys()
        .map(|port| (port_key(*port), HashMap::new()))
        .collect();

    let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = spec
        .ports
        .iter()
        .map(|(container_port, host_port)| {
            (
                port_key(*container_port),
                Some(vec![PortBinding {
                    host_ip: None,
                    host_port: Some(host_port.to_string()),
                }]),
            )
        })
        .collect();

    Config {
        image: Some(spec.image.clone()),
        env: (!spec.env.is_empty()).then(|| spec.env.clone()),
        labels: Some(spec.all_labels().into_iter().collect()),
        exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
        tty: Some(true),
        open_stdin: Some(true),
        host_config: Some(HostConfig {
            port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
            restart_policy: Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::UNLESS_STOPPED),
                maximum_retry_count: None,
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Convert an engine listing entry; entries without an id are dropped.
pub fn summary_from_engine(summary: EngineSummary) -> Option<ContainerSummary> {
    let id = summary.id?;
    let name = summary
        .names
        .and_then(|names| names.into_iter().next())
        .map(|name| name.trim_start_matches('/').to_string())
        .unwrap_or_default();

    let ports = summary
        .ports
        .unwrap_or_default()
        .into_iter()
        .map(|port| PortMapping {
            container_port: port.private_port,
            host_ip: port.ip,
            host_port: port.public_port,
            protocol: match port.typ {
                Some(PortTypeEnum::UDP) => "udp",
                Some(PortTypeEnum::SCTP) => "sctp",
                _ => "tcp",
            }
            .to_string(),
        })
        .collect();

    Some(ContainerSummary {
        id,
        name,
        image: summary.image.unwrap_or_default(),
        state: summary
            .state
            .as_deref()
            .map(ContainerState::parse)
            .unwrap_or(ContainerState::Unknown),
        ports,
        labels: summary.labels.unwrap_or_default().into_iter().collect(),
        created: summary.created,
    })
}
