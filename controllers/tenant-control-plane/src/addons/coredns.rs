//! CoreDNS add-on.

use super::{ADDON_NAMESPACE, AddonConfiguration, AddonKind, apply_all, delete_all};
use crate::cluster::{AddonError, Manifest, ObjectKind, ObjectRef, TenantCluster};
use futures::future::BoxFuture;
use serde_json::json;

/// CoreDNS release installed when the tenant does not pin one
pub const DEFAULT_VERSION: &str = "v1.11.1";

const NAME: &str = "coredns";
const SERVICE_NAME: &str = "kube-dns";
const CLUSTER_ROLE: &str = "system:coredns";

pub fn install<'a>(
    cluster: &'a dyn TenantCluster,
    config: &'a AddonConfiguration,
) -> BoxFuture<'a, Result<(), AddonError>> {
    Box::pin(async move { apply_all(cluster, manifests(config)?).await })
}

pub fn remove<'a>(cluster: &'a dyn TenantCluster) -> BoxFuture<'a, Result<(), AddonError>> {
    Box::pin(async move { delete_all(cluster, AddonKind::CoreDns, objects()).await })
}

fn objects() -> Vec<ObjectRef> {
    vec![
        ObjectRef::namespaced(ObjectKind::ConfigMap, ADDON_NAMESPACE, NAME),
        ObjectRef::namespaced(ObjectKind::Deployment, ADDON_NAMESPACE, NAME),
        ObjectRef::namespaced(ObjectKind::Service, ADDON_NAMESPACE, SERVICE_NAME),
        ObjectRef::namespaced(ObjectKind::ServiceAccount, ADDON_NAMESPACE, NAME),
        ObjectRef::cluster(ObjectKind::ClusterRoleBinding, CLUSTER_ROLE),
        ObjectRef::cluster(ObjectKind::ClusterRole, CLUSTER_ROLE),
    ]
}

fn corefile(cluster_domain: &str) -> String {
    format!(
        r#".:53 {{
    errors
    health {{
       lameduck 5s
    }}
    ready
    kubernetes {cluster_domain} in-addr.arpa ip6.arpa {{
       pods insecure
       fallthrough in-addr.arpa ip6.arpa
       ttl 30
    }}
    prometheus :9153
    forward . /etc/resolv.conf {{
       max_concurrent 1000
    }}
    cache 30
    loop
    reload
    loadbalance
}}
"#
    )
}

pub(crate) fn manifests(config: &AddonConfiguration) -> Result<Vec<Manifest>, AddonError> {
    let labels = json!({ "k8s-app": SERVICE_NAME });

    Ok(vec![
        Manifest::ServiceAccount(serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "ServiceAccount",
            "metadata": { "name": NAME, "namespace": ADDON_NAMESPACE },
        }))?),
        Manifest::ClusterRole(serde_json::from_value(json!({
            "apiVersion": "rbac.authorization.k8s.io/v1",
            "kind": "ClusterRole",
            "metadata": { "name": CLUSTER_ROLE },
            "rules": [
                {
                    "apiGroups": [""],
                    "resources": ["endpoints", "services", "pods", "namespaces"],
                    "verbs": ["list", "watch"],
                },
                {
                    "apiGroups": [""],
                    "resources": ["nodes"],
                    "verbs": ["get"],
                },
                {
                    "apiGroups": ["discovery.k8s.io"],
                    "resources": ["endpointslices"],
                    "verbs": ["list", "watch"],
                },
            ],
        }))?),
        Manifest::ClusterRoleBinding(serde_json::from_value(json!({
            "apiVersion": "rbac.authorization.k8s.io/v1",
            "kind": "ClusterRoleBinding",
            "metadata": { "name": CLUSTER_ROLE },
            "roleRef": {
                "apiGroup": "rbac.authorization.k8s.io",
                "kind": "ClusterRole",
                "name": CLUSTER_ROLE,
            },
            "subjects": [
                { "kind": "ServiceAccount", "name": NAME, "namespace": ADDON_NAMESPACE },
            ],
        }))?),
        Manifest::ConfigMap(serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": NAME, "namespace": ADDON_NAMESPACE },
            "data": { "Corefile": corefile(&config.cluster_domain) },
        }))?),
        Manifest::Deployment(serde_json::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": NAME, "namespace": ADDON_NAMESPACE, "labels": labels },
            "spec": {
                "replicas": 2,
                "selector": { "matchLabels": labels },
                "strategy": { "type": "RollingUpdate", "rollingUpdate": { "maxUnavailable": 1 } },
                "template": {
                    "metadata": { "labels": labels },
                    "spec": {
                        "serviceAccountName": NAME,
                        "priorityClassName": "system-cluster-critical",
                        "tolerations": [
                            { "key": "CriticalAddonsOnly", "operator": "Exists" },
                            { "key": "node-role.kubernetes.io/control-plane", "effect": "NoSchedule" },
                        ],
                        "nodeSelector": { "kubernetes.io/os": "linux" },
                        "containers": [{
                            "name": NAME,
                            "image": config.image,
                            "imagePullPolicy": "IfNotPresent",
                            "args": ["-conf", "/etc/coredns/Corefile"],
                            "ports": [
                                { "name": "dns", "containerPort": 53, "protocol": "UDP" },
                                { "name": "dns-tcp", "containerPort": 53, "protocol": "TCP" },
                                { "name": "metrics", "containerPort": 9153, "protocol": "TCP" },
                            ],
                            "resources": {
                                "limits": { "memory": "170Mi" },
                                "requests": { "cpu": "100m", "memory": "70Mi" },
                            },
                            "volumeMounts": [
                                { "name": "config-volume", "mountPath": "/etc/coredns", "readOnly": true },
                            ],
                            "livenessProbe": {
                                "httpGet": { "path": "/health", "port": 8080, "scheme": "HTTP" },
                                "initialDelaySeconds": 60,
                                "timeoutSeconds": 5,
                            },
                            "readinessProbe": {
                                "httpGet": { "path": "/ready", "port": 8181, "scheme": "HTTP" },
                            },
                            "securityContext": {
                                "allowPrivilegeEscalation": false,
                                "capabilities": { "add": ["NET_BIND_SERVICE"], "drop": ["ALL"] },
                                "readOnlyRootFilesystem": true,
                            },
                        }],
                        "dnsPolicy": "Default",
                        "volumes": [{
                            "name": "config-volume",
                            "configMap": {
                                "name": NAME,
                                "items": [{ "key": "Corefile", "path": "Corefile" }],
                            },
                        }],
                    },
                },
            },
        }))?),
        Manifest::Service(serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": {
                "name": SERVICE_NAME,
                "namespace": ADDON_NAMESPACE,
                "labels": labels,
                "annotations": { "prometheus.io/port": "9153", "prometheus.io/scrape": "true" },
            },
            "spec": {
                "selector": labels,
                "clusterIP": config.dns_service_ip,
                "ports": [
                    { "name": "dns", "port": 53, "protocol": "UDP", "targetPort": 53 },
                    { "name": "dns-tcp", "port": 53, "protocol": "TCP", "targetPort": 53 },
                    { "name": "metrics", "port": 9153, "protocol": "TCP", "targetPort": 9153 },
                ],
            },
        }))?),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockTenantCluster, test_addon_configuration};

    #[test]
    fn test_manifests_use_configuration() {
        let config = test_addon_configuration();
        let manifests = manifests(&config).unwrap();
        assert_eq!(manifests.len(), 6);

        let service = manifests
            .iter()
            .find_map(|m| match m {
                Manifest::Service(s) => Some(s),
                _ => None,
            })
            .unwrap();
        let spec = service.spec.as_ref().unwrap();
        assert_eq!(spec.cluster_ip.as_deref(), Some(config.dns_service_ip.as_str()));

        let config_map = manifests
            .iter()
            .find_map(|m| match m {
                Manifest::ConfigMap(c) => Some(c),
                _ => None,
            })
            .unwrap();
        let corefile = &config_map.data.as_ref().unwrap()["Corefile"];
        assert!(corefile.contains("kubernetes cluster.local in-addr.arpa"));
    }

    #[tokio::test]
    async fn test_install_is_idempotent_and_remove_reports_not_found() {
        let cluster = MockTenantCluster::new();
        let config = test_addon_configuration();

        install(&cluster, &config).await.unwrap();
        install(&cluster, &config).await.unwrap();
        assert_eq!(cluster.object_count(), 6);

        remove(&cluster).await.unwrap();
        assert_eq!(cluster.object_count(), 0);

        let second = remove(&cluster).await;
        assert!(matches!(second, Err(AddonError::NotFound(_))));
    }
}
