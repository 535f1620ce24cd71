//! 清理 DaemonSet：删除每个节点 hostPath 目录下残留的抓包文件后自行退出

use crate::config::CaptureSection;

use super::capture::{NODE_NAME_ENV, VOLUME_NAME};
use super::manifest::{
    app_labels, Container, DaemonSet, DaemonSetSpec, EnvVar, HostPathSource, LabelSelector,
    ObjectMeta, PodSpec, PodTemplateSpec, TemplateMeta, Toleration, Volume, VolumeMount,
};

pub const CONTAINER_NAME: &str = "tcpdump-cleanup";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupWorkloadSpec {
    daemonset: DaemonSet,
}

impl CleanupWorkloadSpec {
    pub fn name(&self) -> &str {
        &self.daemonset.metadata.name
    }

    pub fn manifest(&self) -> &DaemonSet {
        &self.daemonset
    }

    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(&self.daemonset)
    }
}

/// `(image) -> CleanupWorkloadSpec`；`linger_secs` 为删除后退出前的固定等待
pub fn cleanup_workload(layout: &CaptureSection, image: &str, linger_secs: u64) -> CleanupWorkloadSpec {
    let labels = app_labels(&layout.cleanup_app_label);
    let mount = layout.mount_path.trim_end_matches('/');

    let script = format!(
        "rm -f {mount}/*.pcap; echo \"Capture files removed on ${{{node}}}\"; sleep {linger_secs}",
        node = NODE_NAME_ENV,
    );

    let daemonset = DaemonSet {
        api_version: "apps/v1".to_string(),
        kind: "DaemonSet".to_string(),
        metadata: ObjectMeta {
            name: layout.cleanup_daemonset_name.clone(),
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
                    tolerations: vec![Toleration::everything()],
                    volumes: vec![Volume {
                        name: VOLUME_NAME.to_string(),
                        host_path: HostPathSource {
                            path: layout.host_dir.clone(),
                            kind: "DirectoryOrCreate".to_string(),
                        },
                    }],
                    containers: vec![Container {
                        name: CONTAINER_NAME.to_string(),
                        image: image.to_string(),
                        command: vec!["/bin/sh".to_string(), "-c".to_string()],
                        args: vec![script],
                        env: vec![EnvVar::field_ref(NODE_NAME_ENV, "spec.nodeName")],
                        volume_mounts: vec![VolumeMount {
                            name: VOLUME_NAME.to_string(),
                            mount_path: layout.mount_path.clone(),
                        }],
                        security_context: None,
                    }],
                    ..Default::default()
                },
            },
        },
    };

    CleanupWorkloadSpec { daemonset }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleanup_tolerates_all_taints() {
        let spec = cleanup_workload(&CaptureSection::default(), "img:tag", 3);
        let tolerations = &spec.manifest().spec.template.spec.tolerations;
        assert_eq!(tolerations, &vec![Toleration::everything()]);
    }

    #[test]
    fn test_cleanup_removes_artifacts_then_exits() {
        let spec = cleanup_workload(&CaptureSection::default(), "img:tag", 3);
        let json = spec.to_json().unwrap();
        let container = &json["spec"]["template"]["spec"]["containers"][0];
        let script = container["args"][0].as_str().unwrap();
        assert!(script.starts_with("rm -f /captures/*.pcap;"));
        assert!(script.ends_with("sleep 3"));
        assert_eq!(container["image"], "img:tag");
        assert_eq!(
            json["spec"]["template"]["spec"]["volumes"][0]["hostPath"]["path"],
            "/tmp/captures"
        );
    }

    #[test]
    fn test_cleanup_uses_its_own_name_and_label() {
        let spec = cleanup_workload(&CaptureSection::default(), "img:tag", 3);
        assert_eq!(spec.name(), "tcpdump-cleanup-ds");
        assert_eq!(spec.manifest().spec.selector.match_labels["app"], "tcpdump-cleanup");
        assert!(spec.manifest().spec.template.spec.containers[0].security_context.is_none());
    }
}
