//! 抓包 DaemonSet：每个节点一个 tcpdump 实例
//!
//! 过滤规则原样透传（调用方可信，不做任何校验或转义）。规则作为 `sh -c` 的位置参数 `$1`
//! 传入而不是拼进脚本文本，因此规则内容不会被 shell 再解析一次。

use crate::config::CaptureSection;

use super::manifest::{
    app_labels, Container, DaemonSet, DaemonSetSpec, EnvVar, HostPathSource, LabelSelector,
    ObjectMeta, PodSpec, PodTemplateSpec, SecurityContext, TemplateMeta, Toleration, Volume,
    VolumeMount,
};

pub const CONTAINER_NAME: &str = "tcpdump-container";
pub(crate) const VOLUME_NAME: &str = "capture-storage";
pub(crate) const NODE_NAME_ENV: &str = "NODE_NAME";

const CONTROL_PLANE_TAINTS: [&str; 2] = [
    "node-role.kubernetes.io/master",
    "node-role.kubernetes.io/control-plane",
];

/// 提交给编排 API 的抓包工作负载（不可变）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureWorkloadSpec {
    daemonset: DaemonSet,
}

impl CaptureWorkloadSpec {
    pub fn name(&self) -> &str {
        &self.daemonset.metadata.name
    }

    pub fn manifest(&self) -> &DaemonSet {
        &self.daemonset
    }

    pub fn container(&self) -> &Container {
        &self.daemonset.spec.template.spec.containers[0]
    }

    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(&self.daemonset)
    }
}

/// 节点上的抓包文件路径（容器内视角），文件名取自 `$NODE_NAME`
pub fn artifact_path(mount_path: &str) -> String {
    format!("{}/${{{}}}.pcap", mount_path.trim_end_matches('/'), NODE_NAME_ENV)
}

/// 启动脚本：先删除同路径的旧文件，再 exec 一次 tcpdump，过滤规则取 `$1`
fn capture_script(mount_path: &str) -> String {
    let artifact = artifact_path(mount_path);
    format!(
        "rm -f \"{artifact}\" && \
         echo \"Starting capture on all interfaces (any) with filter: $1\" && \
         exec tcpdump -i any -s0 -w \"{artifact}\" \"$1\""
    )
}

/// `(filter, image) -> CaptureWorkloadSpec`，纯函数
pub fn capture_workload(layout: &CaptureSection, filter: &str, image: &str) -> CaptureWorkloadSpec {
    let labels = app_labels(&layout.app_label);

    let container = Container {
        name: CONTAINER_NAME.to_string(),
        image: image.to_string(),
        command: vec!["/bin/sh".to_string(), "-c".to_string()],
        args: vec![
            capture_script(&layout.mount_path),
            "tcpdump-capture".to_string(),
            filter.to_string(),
        ],
        env: vec![EnvVar::field_ref(NODE_NAME_ENV, "spec.nodeName")],
        volume_mounts: vec![VolumeMount {
            name: VOLUME_NAME.to_string(),
            mount_path: layout.mount_path.clone(),
        }],
        security_context: Some(SecurityContext { privileged: true }),
    };

    let daemonset = DaemonSet {
        api_version: "apps/v1".to_string(),
        kind: "DaemonSet".to_string(),
        metadata: ObjectMeta {
            name: layout.daemonset_name.clone(),
            namespace: Some(layout.namespace.clone()),
            labels: Default::default(),
        },
        spec: DaemonSetSpec {
            selector: LabelSelector {
                match_labels: labels.clone(),
            },
            template: PodTemplateSpec {
                metadata: TemplateMeta { labels },
                spec: PodSpec {
                    host_network: true,
                    host_pid: true,
                    tolerations: CONTROL_PLANE_TAINTS
                        .iter()
                        .map(|key| Toleration::no_schedule(key))
                        .collect(),
                    volumes: vec![Volume {
                        name: VOLUME_NAME.to_string(),
                        host_path: HostPathSource {
                            path: layout.host_dir.clone(),
                            kind: "DirectoryOrCreate".to_string(),
                        },
                    }],
                    containers: vec![container],
                },
            },
        },
    };

    CaptureWorkloadSpec { daemonset }
}
