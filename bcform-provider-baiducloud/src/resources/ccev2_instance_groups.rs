//! baiducloud.ccev2_instance_groups - worker instance groups of a container cluster (data source)

use std::collections::HashMap;

use bcform_core::provider::{ProviderResult, ResourceType};
use bcform_core::resource::{Resource, State, Value};
use bcform_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};

use super::{Attrs, fail, require_str};
use crate::api::cce::InstanceGroup;
use crate::connectivity::BaiduClient;

pub struct InstanceGroupsType;

impl ResourceType for InstanceGroupsType {
    fn name(&self) -> &'static str {
        "ccev2_instance_groups"
    }

    fn schema(&self) -> ResourceSchema {
        let group = types::blocks(vec![
            AttributeSchema::new("instance_group_id", AttributeType::String),
            AttributeSchema::new("instance_group_name", AttributeType::String),
            AttributeSchema::new("replicas", AttributeType::Int),
            AttributeSchema::new("ready_replicas", AttributeType::Int),
            AttributeSchema::new("status", AttributeType::String),
            AttributeSchema::new("create_time", AttributeType::String),
        ]);
        ResourceSchema::new("ccev2_instance_groups")
            .with_description("List the worker instance groups of a cluster")
            .as_data_source()
            .attribute(AttributeSchema::new("cluster_id", AttributeType::String).required())
            .attribute(AttributeSchema::new("page_no", AttributeType::Int).with_default(Value::Int(0)))
            .attribute(AttributeSchema::new("page_size", AttributeType::Int).with_default(Value::Int(0)))
            .attribute(
                AttributeSchema::new("left_nodes", AttributeType::Int)
                    .with_default(Value::Int(0))
                    .with_description("Only groups with at least this many replicas"),
            )
            .attribute(AttributeSchema::new("total_count", AttributeType::Int).output())
            .attribute(AttributeSchema::new("instance_group_list", group).output())
    }
}

fn group_value(group: &InstanceGroup) -> Value {
    let status = if group.status.ready_replicas == group.spec.replicas {
        "Ready"
    } else {
        "Scaling"
    };
    Value::Map(HashMap::from([
        (
            "instance_group_id".to_string(),
            Value::String(group.spec.cce_instance_group_id.clone()),
        ),
        (
            "instance_group_name".to_string(),
            Value::String(group.spec.instance_group_name.clone()),
        ),
        ("replicas".to_string(), Value::Int(group.spec.replicas)),
        ("ready_replicas".to_string(), Value::Int(group.status.ready_replicas)),
        ("status".to_string(), Value::from(status)),
        ("create_time".to_string(), Value::String(group.created_at.clone())),
    ]))
}

pub async fn read(client: &BaiduClient, resource: &Resource) -> ProviderResult<State> {
    let id = &resource.id;
    let cluster_id = require_str(resource, "cluster_id")?;
    let page_no = resource.get_int("page_no").unwrap_or(0);
    let page_size = resource.get_int("page_size").unwrap_or(0);
    let left_nodes = resource.get_int("left_nodes").unwrap_or(0);

    let page = client
        .cce()
        .list_instance_groups(&cluster_id, page_no, page_size)
        .await
        .map_err(fail("Failed to list instance groups", id))?;
    let groups: Vec<Value> = page
        .list
        .iter()
        .filter(|g| g.is_worker() && g.spec.replicas >= left_nodes)
        .map(group_value)
        .collect();
    log::debug!("{} of {} instance groups of {} match", groups.len(), page.list.len(), cluster_id);

    let mut attrs = Attrs::new();
    attrs
        .set("cluster_id", cluster_id.as_str())
        .set("page_no", page_no)
        .set("page_size", page_size)
        .set("left_nodes", left_nodes)
        .set("total_count", page.total_count)
        .set("instance_group_list", Value::List(groups));
    Ok(State::existing(id.clone(), attrs.into_map()).with_identifier(cluster_id))
}
