//! `Provider` implementation dispatching to the resource handlers

use bcform_core::provider::{
    BoxFuture, Provider, ProviderError, ProviderResult, ResourceType, find_schema,
};
use bcform_core::resource::{Resource, ResourceId, State};
use bcform_core::schema::ResourceSchema;

use crate::connectivity::{BaiduClient, Config};
use crate::error::BceResult;
use crate::resources::{
    self, bbc_flavor_images, blb, blb_backend, blb_listener, ccev2_instance_group_replica,
    ccev2_instance_groups, cert, deployset, es_cluster,
};

pub const PROVIDER_NAME: &str = "baiducloud";

/// Baidu Cloud provider
pub struct BaiduCloudProvider {
    client: BaiduClient,
}

impl BaiduCloudProvider {
    pub fn new(config: Config) -> BceResult<Self> {
        log::debug!("Configuring {} provider for region {}", PROVIDER_NAME, config.region);
        Ok(Self::with_client(BaiduClient::new(config)?))
    }

    pub fn with_client(client: BaiduClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &BaiduClient {
        &self.client
    }
}

fn unknown_type(id: &ResourceId) -> ProviderError {
    ProviderError::new(format!("Unknown resource type: {}", id.resource_type)).for_resource(id.clone())
}

/// Keep desired secrets and write-only attributes the service never reports back
///
/// Anything else missing from the read is left out so drift stays visible.
fn carry_over(state: State, desired: &Resource, schema: Option<&ResourceSchema>) -> State {
    let Some(schema) = schema else {
        return state;
    };
    if !state.exists {
        return state;
    }
    let mut state = state;
    for (key, value) in &desired.attributes {
        if schema.is_unreadable(key) && !state.attributes.contains_key(key) {
            state.attributes.insert(key.clone(), value.clone());
        }
    }
    state
}

impl Provider for BaiduCloudProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn resource_types(&self) -> Vec<Box<dyn ResourceType>> {
        resources::all_types()
    }

    fn read(&self, id: &ResourceId, identifier: Option<&str>) -> BoxFuture<'_, ProviderResult<State>> {
        let id = id.clone();
        let identifier = identifier.map(str::to_string);
        Box::pin(async move {
            let Some(identifier) = identifier else {
                return Ok(State::not_found(id));
            };
            let client = &self.client;
            match id.resource_type.as_str() {
                "blb" => blb::read(client, &id, &identifier).await,
                "blb_listener" => blb_listener::read(client, &id, &identifier).await,
                "blb_backend" => blb_backend::read(client, &id, &identifier).await,
                "ccev2_instance_group_replica" => {
                    ccev2_instance_group_replica::read(client, &id, &identifier).await
                }
                "es_cluster" => es_cluster::read(client, &id, &identifier).await,
                "cert" => cert::read(client, &id, &identifier).await,
                "deployset" => deployset::read(client, &id, &identifier).await,
                _ => Err(unknown_type(&id)),
            }
        })
    }

    fn read_data_source(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        let resource = resource.clone();
        Box::pin(async move {
            let client = &self.client;
            match resource.id.resource_type.as_str() {
                "ccev2_instance_groups" => ccev2_instance_groups::read(client, &resource).await,
                "bbc_flavor_images" => bbc_flavor_images::read(client, &resource).await,
                _ => Err(ProviderError::new(format!(
                    "{} is not a data source",
                    resource.id.resource_type
                ))
                .for_resource(resource.id.clone())),
            }
        })
    }

    fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        let resource = resource.clone();
        Box::pin(async move {
            let client = &self.client;
            let state = match resource.id.resource_type.as_str() {
                "blb" => blb::create(client, &resource).await,
                "blb_listener" => blb_listener::create(client, &resource).await,
                "blb_backend" => blb_backend::create(client, &resource).await,
                "ccev2_instance_group_replica" => {
                    ccev2_instance_group_replica::create(client, &resource).await
                }
                "es_cluster" => es_cluster::create(client, &resource).await,
                "cert" => cert::create(client, &resource).await,
                "deployset" => deployset::create(client, &resource).await,
                _ => Err(unknown_type(&resource.id)),
            }?;
            let schema = find_schema(self, &resource.id.resource_type);
            Ok(carry_over(state, &resource, schema.as_ref()))
        })
    }

    fn update(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        let id = id.clone();
        let identifier = identifier.to_string();
        let from = from.clone();
        let to = to.clone();
        Box::pin(async move {
            let client = &self.client;
            let state = match id.resource_type.as_str() {
                "blb" => blb::update(client, &id, &identifier, &from, &to).await,
                "blb_listener" => blb_listener::update(client, &id, &identifier, &from, &to).await,
                "blb_backend" => blb_backend::update(client, &id, &identifier, &from, &to).await,
                "ccev2_instance_group_replica" => {
                    ccev2_instance_group_replica::update(client, &id, &identifier, &from, &to).await
                }
                "es_cluster" => es_cluster::update(client, &id, &identifier, &from, &to).await,
                "cert" => cert::update(client, &id, &identifier, &from, &to).await,
                "deployset" => deployset::update(client, &id, &identifier, &from, &to).await,
                _ => Err(unknown_type(&id)),
            }?;
            let schema = find_schema(self, &id.resource_type);
            Ok(carry_over(state, &to, schema.as_ref()))
        })
    }

    fn delete(&self, id: &ResourceId, identifier: &str) -> BoxFuture<'_, ProviderResult<()>> {
        let id = id.clone();
        let identifier = identifier.to_string();
        Box::pin(async move {
            let client = &self.client;
            match id.resource_type.as_str() {
                "blb" => blb::delete(client, &id, &identifier).await,
                "blb_listener" => blb_listener::delete(client, &id, &identifier).await,
                "blb_backend" => blb_backend::delete(client, &id, &identifier).await,
                "ccev2_instance_group_replica" => {
                    ccev2_instance_group_replica::delete(client, &id, &identifier).await
                }
                "es_cluster" => es_cluster::delete(client, &id, &identifier).await,
                "cert" => cert::delete(client, &id, &identifier).await,
                "deployset" => deployset::delete(client, &id, &identifier).await,
                _ => Err(unknown_type(&id)),
            }
        })
    }
}
