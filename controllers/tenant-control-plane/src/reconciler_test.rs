//! Unit tests for the resource pipeline run by the reconciler

#[cfg(test)]
mod tests {
    use crate::addons::{AddonKind, AddonRegistry};
    use crate::error::ControllerError;
    use crate::reconciler::{StatusWriter, check_driver, run_resources, tenant_key};
    use crate::resources::Resource;
    use crate::resources::addons::{AddonResource, desired_checksum};
    use crate::resources::datastore_config::{DataStoreConfig, tenant_identifier};
    use crate::resources::datastore_setup::DataStoreSetup;
    use crate::test_utils::*;
    use crds::{AddonSpec, TenantControlPlane, TenantControlPlaneStatus};
    use datastore_client::{MockConnection, Operation};
    use std::sync::{Arc, Mutex};

    /// Keeps every status written, in order
    #[derive(Default)]
    struct RecordingWriter {
        written: Mutex<Vec<Option<TenantControlPlaneStatus>>>,
    }

    impl RecordingWriter {
        fn count(&self) -> usize {
            self.written.lock().unwrap().len()
        }
    }

    #[async_trait::async_trait]
    impl StatusWriter for RecordingWriter {
        async fn write_status(&self, tenant: &TenantControlPlane) -> Result<(), ControllerError> {
            self.written.lock().unwrap().push(tenant.status.clone());
            Ok(())
        }
    }

    struct Fixture {
        secrets: MockSecretStore,
        connection: MockConnection,
        cluster: MockTenantCluster,
        factory: MockClusterFactory,
    }

    impl Fixture {
        fn new() -> Self {
            let cluster = MockTenantCluster::new();
            Self {
                secrets: MockSecretStore::new(),
                connection: MockConnection::new(),
                factory: MockClusterFactory::new(cluster.clone()),
                cluster,
            }
        }

        fn resources(&self, tenant: &TenantControlPlane) -> Vec<Box<dyn Resource>> {
            let mut resources: Vec<Box<dyn Resource>> = vec![
                Box::new(DataStoreConfig::new(Arc::new(self.secrets.clone()), "default", "PostgreSQL")),
                Box::new(DataStoreSetup::new(
                    Arc::new(self.secrets.clone()),
                    Arc::new(self.connection.clone()),
                    "PostgreSQL",
                )),
            ];
            for kind in AddonKind::ALL {
                let mut addon =
                    AddonResource::new(kind, &AddonRegistry::builtin(), Arc::new(self.factory.clone())).unwrap();
                addon.set_config_checksum(desired_checksum(tenant, kind).unwrap().unwrap_or_default());
                resources.push(Box::new(addon));
            }
            resources
        }

        async fn reconcile(&self, tenant: &mut TenantControlPlane, writer: &RecordingWriter) -> Result<(), ControllerError> {
            let mut resources = self.resources(tenant);
            run_resources(&mut resources, tenant, writer).await
        }
    }

    fn tenant() -> TenantControlPlane {
        let mut tenant = create_test_tenant("tenant-a", "default");
        tenant.spec.kubernetes.version = "v1.30.2".to_string();
        tenant.spec.addons.core_dns = Some(AddonSpec::default());
        tenant.spec.addons.kube_proxy = Some(AddonSpec::default());
        tenant.status_mut().kubeconfig.admin.secret_name = "tenant-a-admin-kubeconfig".to_string();
        tenant
    }

    #[test]
    fn test_tenant_key() {
        assert_eq!(tenant_key(&create_test_tenant("tenant-a", "team-1")), "team-1/tenant-a");
    }

    #[test]
    fn test_check_driver() {
        let connection = MockConnection::new();
        assert!(check_driver("PostgreSQL", &connection).is_ok());
        assert!(matches!(
            check_driver("MySQL", &connection),
            Err(ControllerError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_first_reconciliation_provisions_everything() {
        let fixture = Fixture::new();
        let writer = RecordingWriter::default();
        let mut tenant = tenant();

        fixture.reconcile(&mut tenant, &writer).await.unwrap();

        let identifier = tenant_identifier(&tenant);
        assert!(fixture.connection.has_schema(&identifier));
        assert!(fixture.connection.has_grant(&identifier, &identifier));
        assert_eq!(fixture.cluster.object_count(), 10);
        assert_eq!(writer.count(), 4);

        let storage = tenant.storage_status();
        assert_eq!(storage.setup.checksum, storage.config.checksum);
        let addons = tenant.addons_status();
        assert!(!addons.core_dns.checksum.is_empty());
        assert!(!addons.kube_proxy.checksum.is_empty());
    }

    #[tokio::test]
    async fn test_similar_names_get_separate_datastore_artifacts() {
        let fixture = Fixture::new();
        let writer = RecordingWriter::default();
        let mut first = create_test_tenant("x", "team-1");
        let mut second = create_test_tenant("1-x", "team");

        fixture.reconcile(&mut first, &writer).await.unwrap();
        let first_password = fixture.connection.password_of(&tenant_identifier(&first)).unwrap();
        fixture.reconcile(&mut second, &writer).await.unwrap();

        let (a, b) = (tenant_identifier(&first), tenant_identifier(&second));
        assert_ne!(a, b);
        assert!(fixture.connection.has_grant(&a, &a));
        assert!(fixture.connection.has_grant(&b, &b));
        assert_eq!(fixture.connection.password_of(&a).unwrap(), first_password);
        let second_secret = fixture.secrets.data("team", "1-x-datastore-config").unwrap();
        assert_eq!(fixture.connection.password_of(&b).unwrap(), second_secret["DB_PASSWORD"]);
    }

    #[tokio::test]
    async fn test_steady_state_writes_nothing() {
        let fixture = Fixture::new();
        let writer = RecordingWriter::default();
        let mut tenant = tenant();
        fixture.reconcile(&mut tenant, &writer).await.unwrap();

        let steady = RecordingWriter::default();
        fixture.connection.reset_mutations();
        fixture.reconcile(&mut tenant, &steady).await.unwrap();

        assert_eq!(steady.count(), 0);
        assert!(fixture.connection.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_regenerated_credentials_reprovision_datastore() {
        let fixture = Fixture::new();
        let writer = RecordingWriter::default();
        let mut tenant = tenant();
        fixture.reconcile(&mut tenant, &writer).await.unwrap();
        let identifier = tenant_identifier(&tenant);
        let first_password = fixture.connection.password_of(&identifier).unwrap();

        fixture.secrets.remove("default", "tenant-a-datastore-config");
        fixture.connection.reset_mutations();
        fixture.reconcile(&mut tenant, &writer).await.unwrap();

        let operations: Vec<Operation> = fixture.connection.mutations().into_iter().map(|(op, _)| op).collect();
        assert_eq!(
            operations,
            vec![
                Operation::Revoke,
                Operation::DeleteSchema,
                Operation::DeleteUser,
                Operation::CreateSchema,
                Operation::CreateUser,
                Operation::Grant,
            ]
        );
        assert_ne!(fixture.connection.password_of(&identifier).unwrap(), first_password);
        let storage = tenant.storage_status();
        assert_eq!(storage.setup.checksum, storage.config.checksum);
    }

    #[tokio::test]
    async fn test_failure_keeps_earlier_progress() {
        let fixture = Fixture::new();
        fixture.cluster.fail_apply(true);
        let writer = RecordingWriter::default();
        let mut tenant = tenant();

        let error = fixture.reconcile(&mut tenant, &writer).await.unwrap_err();
        assert!(matches!(error, ControllerError::ExternalApplyFailed { .. }));

        // Datastore progress was persisted, add-on status was not
        assert_eq!(writer.count(), 2);
        assert!(tenant.addons_status().core_dns.checksum.is_empty());
        assert!(!tenant.storage_status().setup.checksum.is_empty());

        fixture.cluster.fail_apply(false);
        fixture.reconcile(&mut tenant, &writer).await.unwrap();
        assert!(!tenant.addons_status().core_dns.checksum.is_empty());
    }

    #[tokio::test]
    async fn test_removed_addon_is_cleaned_up() {
        let fixture = Fixture::new();
        let writer = RecordingWriter::default();
        let mut tenant = tenant();
        fixture.reconcile(&mut tenant, &writer).await.unwrap();

        tenant.spec.addons.kube_proxy = None;
        let cleanup = RecordingWriter::default();
        fixture.reconcile(&mut tenant, &cleanup).await.unwrap();

        assert_eq!(fixture.cluster.object_count(), 6);
        assert_eq!(cleanup.count(), 1);
        assert!(tenant.addons_status().kube_proxy.checksum.is_empty());
    }
}
