//! kube-proxy add-on.

use super::{ADDON_NAMESPACE, AddonConfiguration, AddonKind, apply_all, delete_all};
use crate::cluster::{AddonError, Manifest, ObjectKind, ObjectRef, TenantCluster};
use futures::future::BoxFuture;
use serde_json::json;

const NAME: &str = "kube-proxy";
const CLUSTER_ROLE_BINDING: &str = "kubeadm:node-proxier";

pub fn install<'a>(
    cluster: &'a dyn TenantCluster,
    config: &'a AddonConfiguration,
) -> BoxFuture<'a, Result<(), AddonError>> {
    Box::pin(async move { apply_all(cluster, manifests(config)?).await })
}

pub fn remove<'a>(cluster: &'a dyn TenantCluster) -> BoxFuture<'a, Result<(), AddonError>> {
    Box::pin(async move { delete_all(cluster, AddonKind::KubeProxy, objects()).await })
}

fn objects() -> Vec<ObjectRef> {
    vec![
        ObjectRef::namespaced(ObjectKind::DaemonSet, ADDON_NAMESPACE, NAME),
        ObjectRef::namespaced(ObjectKind::ConfigMap, ADDON_NAMESPACE, NAME),
        ObjectRef::cluster(ObjectKind::ClusterRoleBinding, CLUSTER_ROLE_BINDING),
        ObjectRef::namespaced(ObjectKind::ServiceAccount, ADDON_NAMESPACE, NAME),
    ]
}

fn proxy_config(pod_cidr: &str) -> String {
    format!(
        r#"apiVersion: kubeproxy.config.k8s.io/v1alpha1
kind: KubeProxyConfiguration
bindAddress: 0.0.0.0
clientConnection:
  kubeconfig: /var/lib/kube-proxy/kubeconfig.conf
clusterCIDR: {pod_cidr}
mode: ""
"#
    )
}

fn proxy_kubeconfig(server: &str) -> String {
    format!(
        r#"apiVersion: v1
kind: Config
clusters:
- cluster:
    certificate-authority: /var/run/secrets/kubernetes.io/serviceaccount/ca.crt
    server: {server}
  name: default
contexts:
- context:
    cluster: default
    namespace: default
    user: default
  name: default
current-context: default
users:
- name: default
  user:
    tokenFile: /var/run/secrets/kubernetes.io/serviceaccount/token
"#
    )
}

pub(crate) fn manifests(config: &AddonConfiguration) -> Result<Vec<Manifest>, AddonError> {
    let labels = json!({ "k8s-app": NAME });
    let server = config
        .control_plane_endpoint
        .as_deref()
        .map(|endpoint| format!("https://{endpoint}"))
        .unwrap_or_else(|| "https://kubernetes.default.svc".to_string());

    Ok(vec![
        Manifest::ServiceAccount(serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "ServiceAccount",
            "metadata": { "name": NAME, "namespace": ADDON_NAMESPACE },
        }))?),
        Manifest::ClusterRoleBinding(serde_json::from_value(json!({
            "apiVersion": "rbac.authorization.k8s.io/v1",
            "kind": "ClusterRoleBinding",
            "metadata": { "name": CLUSTER_ROLE_BINDING },
            "roleRef": {
                "apiGroup": "rbac.authorization.k8s.io",
                "kind": "ClusterRole",
                "name": "system:node-proxier",
            },
            "subjects": [
                { "kind": "ServiceAccount", "name": NAME, "namespace": ADDON_NAMESPACE },
            ],
        }))?),
        Manifest::ConfigMap(serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": NAME, "namespace": ADDON_NAMESPACE, "labels": { "app": NAME } },
            "data": {
                "config.conf": proxy_config(&config.pod_cidr),
                "kubeconfig.conf": proxy_kubeconfig(&server),
            },
        }))?),
        Manifest::DaemonSet(serde_json::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "DaemonSet",
            "metadata": { "name": NAME, "namespace": ADDON_NAMESPACE, "labels": labels },
            "spec": {
                "selector": { "matchLabels": labels },
                "updateStrategy": { "type": "RollingUpdate" },
                "template": {
                    "metadata": { "labels": labels },
                    "spec": {
                        "serviceAccountName": NAME,
                        "priorityClassName": "system-node-critical",
                        "hostNetwork": true,
                        "nodeSelector": { "kubernetes.io/os": "linux" },
                        "tolerations": [{ "operator": "Exists" }],
                        "containers": [{
                            "name": NAME,
                            "image": config.image,
                            "imagePullPolicy": "IfNotPresent",
                            "command": [
                                "/usr/local/bin/kube-proxy",
                                "--config=/var/lib/kube-proxy/config.conf",
                                "--hostname-override=$(NODE_NAME)",
                            ],
                            "env": [{
                                "name": "NODE_NAME",
                                "valueFrom": { "fieldRef": { "fieldPath": "spec.nodeName" } },
                            }],
                            "securityContext": { "privileged": true },
                            "volumeMounts": [
                                { "name": "kube-proxy", "mountPath": "/var/lib/kube-proxy" },
                                { "name": "xtables-lock", "mountPath": "/run/xtables.lock" },
                                { "name": "lib-modules", "mountPath": "/lib/modules", "readOnly": true },
                            ],
                        }],
                        "volumes": [
                            { "name": "kube-proxy", "configMap": { "name": NAME } },
                            {
                                "name": "xtables-lock",
                                "hostPath": { "path": "/run/xtables.lock", "type": "FileOrCreate" },
                            },
                            { "name": "lib-modules", "hostPath": { "path": "/lib/modules" } },
                        ],
                    },
                },
            },
        }))?),
    ])
}
