//! Avi controller tool catalog

use serde_json::json;

use super::schema::{
    array_prop, boolean_prop, enum_prop, free_object_prop, integer_prop, object_schema,
    string_prop, with_default,
};
use super::ToolDefinition;

/// Tool names as exposed to the model
pub mod names {
    pub const LIST_VIRTUAL_SERVICES: &str = "list_virtual_services";
    pub const GET_VIRTUAL_SERVICE: &str = "get_virtual_service";
    pub const CREATE_VIRTUAL_SERVICE: &str = "create_virtual_service";
    pub const UPDATE_VIRTUAL_SERVICE: &str = "update_virtual_service";
    pub const DELETE_VIRTUAL_SERVICE: &str = "delete_virtual_service";
    pub const LIST_POOLS: &str = "list_pools";
    pub const GET_POOL: &str = "get_pool";
    pub const CREATE_POOL: &str = "create_pool";
    pub const UPDATE_POOL: &str = "update_pool";
    pub const DELETE_POOL: &str = "delete_pool";
    pub const SCALE_OUT_POOL: &str = "scale_out_pool";
    pub const SCALE_IN_POOL: &str = "scale_in_pool";
    pub const LIST_HEALTH_MONITORS: &str = "list_health_monitors";
    pub const GET_HEALTH_MONITOR: &str = "get_health_monitor";
    pub const LIST_SERVICE_ENGINES: &str = "list_service_engines";
    pub const GET_SERVICE_ENGINE: &str = "get_service_engine";
    pub const GET_ANALYTICS: &str = "get_analytics";
    pub const EXECUTE_GENERIC_OPERATION: &str = "execute_generic_operation";
}

const FIELDS: &str = "Comma-separated list of fields to return";

fn uuid_prop(resource: &str) -> serde_json::Value {
    string_prop(&format!("UUID of the {}", resource))
}

fn service_port_schema() -> serde_json::Value {
    object_schema()
        .description("Listening port")
        .property("port", integer_prop("Port number"), true)
        .property("enable_ssl", boolean_prop("Terminate TLS on this port"), false)
        .build()
}

fn server_schema() -> serde_json::Value {
    object_schema()
        .description("Backend server")
        .property(
            "ip",
            object_schema()
                .property("addr", string_prop("IP address of the server"), true)
                .property(
                    "type",
                    with_default(enum_prop("Address family", &["V4", "V6"]), json!("V4")),
                    false,
                )
                .build(),
            true,
        )
        .property("port", integer_prop("Server port (defaults to the pool port)"), false)
        .property(
            "enabled",
            with_default(boolean_prop("Whether the server takes traffic"), json!(true)),
            false,
        )
        .build()
}

/// Every controller tool, in the order shown to the model
pub fn catalog() -> Vec<ToolDefinition> {
    vec![
        // Virtual services
        ToolDefinition::new(
            names::LIST_VIRTUAL_SERVICES,
            "List virtual services with optional filtering. Use this when the user asks to see or list virtual services.",
            object_schema()
                .property("name", string_prop("Filter by virtual service name"), false)
                .property("tenant", string_prop("Filter by tenant"), false)
                .property("enabled", boolean_prop("Filter by enabled state"), false)
                .property("fields", string_prop(FIELDS), false)
                .build(),
        )
        .read_only(),
        ToolDefinition::new(
            names::GET_VIRTUAL_SERVICE,
            "Get details of a specific virtual service by UUID.",
            object_schema()
                .property("uuid", uuid_prop("virtual service"), true)
                .property("fields", string_prop(FIELDS), false)
                .build(),
        )
        .read_only(),
        ToolDefinition::new(
            names::CREATE_VIRTUAL_SERVICE,
            "Create a new virtual service. Use this when the user wants to set up a new virtual service.",
            object_schema()
                .property("name", string_prop("Name of the virtual service"), true)
                .property("services", array_prop("Listening ports", service_port_schema()), false)
                .property("pool_ref", string_prop("Reference (URL or UUID) of the backend pool"), false)
                .property("vsvip_ref", string_prop("Reference (URL or UUID) of the VIP object"), false)
                .build(),
        ),
        ToolDefinition::new(
            names::UPDATE_VIRTUAL_SERVICE,
            "Update an existing virtual service. Only the given fields are changed.",
            object_schema()
                .property("uuid", uuid_prop("virtual service"), true)
                .property("name", string_prop("New name"), false)
                .property("enabled", boolean_prop("Enable or disable the virtual service"), false)
                .property("services", array_prop("Listening ports", service_port_schema()), false)
                .build(),
        ),
        ToolDefinition::new(
            names::DELETE_VIRTUAL_SERVICE,
            "Delete a virtual service.",
            object_schema()
                .property("uuid", uuid_prop("virtual service"), true)
                .build(),
        ),
        // Pools
        ToolDefinition::new(
            names::LIST_POOLS,
            "List backend server pools with optional filtering.",
            object_schema()
                .property("name", string_prop("Filter by pool name"), false)
                .property("enabled", boolean_prop("Filter by enabled state"), false)
                .property(
                    "health_status",
                    enum_prop("Filter by health status", &["up", "down", "partial"]),
                    false,
                )
                .property("fields", string_prop(FIELDS), false)
                .build(),
        )
        .read_only(),
        ToolDefinition::new(
            names::GET_POOL,
            "Get details of a specific pool by UUID, including its servers.",
            object_schema()
                .property("uuid", uuid_prop("pool"), true)
                .property("fields", string_prop(FIELDS), false)
                .build(),
        )
        .read_only(),
        ToolDefinition::new(
            names::CREATE_POOL,
            "Create a new pool of backend servers.",
            object_schema()
                .property("name", string_prop("Name of the pool"), true)
                .property("servers", array_prop("Backend servers", server_schema()), false)
                .property(
                    "default_server_port",
                    with_default(integer_prop("Port used for servers without one"), json!(80)),
                    false,
                )
                .property(
                    "lb_algorithm",
                    with_default(
                        string_prop("Load balancing algorithm"),
                        json!("LB_ALGORITHM_LEAST_CONNECTIONS"),
                    ),
                    false,
                )
                .build(),
        ),
        ToolDefinition::new(
            names::UPDATE_POOL,
            "Update an existing pool. Only the given fields are changed; servers replaces the full server list.",
            object_schema()
                .property("uuid", uuid_prop("pool"), true)
                .property("name", string_prop("New name"), false)
                .property("enabled", boolean_prop("Enable or disable the pool"), false)
                .property("servers", array_prop("Backend servers", server_schema()), false)
                .property("default_server_port", integer_prop("Default server port"), false)
                .property("lb_algorithm", string_prop("Load balancing algorithm"), false)
                .build(),
        ),
        ToolDefinition::new(
            names::DELETE_POOL,
            "Delete a pool.",
            object_schema()
                .property("uuid", uuid_prop("pool"), true)
                .build(),
        ),
        ToolDefinition::new(
            names::SCALE_OUT_POOL,
            "Scale out a pool by adding capacity.",
            object_schema()
                .property("uuid", uuid_prop("pool"), true)
                .property(
                    "reason",
                    with_default(string_prop("Reason for the operation"), json!("Manual scale out operation")),
                    false,
                )
                .build(),
        ),
        ToolDefinition::new(
            names::SCALE_IN_POOL,
            "Scale in a pool by removing servers.",
            object_schema()
                .property("uuid", uuid_prop("pool"), true)
                .property("servers", array_prop("Servers to remove", server_schema()), false)
                .property(
                    "reason",
                    with_default(string_prop("Reason for the operation"), json!("Manual scale in operation")),
                    false,
                )
                .build(),
        ),
        // Health monitors
        ToolDefinition::new(
            names::LIST_HEALTH_MONITORS,
            "List health monitors. Use this when the user asks about health checks.",
            object_schema()
                .property("name", string_prop("Filter by health monitor name"), false)
                .property(
                    "type",
                    string_prop("Filter by type (HEALTH_MONITOR_HTTP, HEALTH_MONITOR_HTTPS, HEALTH_MONITOR_TCP, ...)"),
                    false,
                )
                .property("fields", string_prop(FIELDS), false)
                .build(),
        )
        .read_only(),
        ToolDefinition::new(
            names::GET_HEALTH_MONITOR,
            "Get details of a specific health monitor by UUID.",
            object_schema()
                .property("uuid", uuid_prop("health monitor"), true)
                .property("fields", string_prop(FIELDS), false)
                .build(),
        )
        .read_only(),
        // Service engines
        ToolDefinition::new(
            names::LIST_SERVICE_ENGINES,
            "List service engines (the data plane instances).",
            object_schema()
                .property("name", string_prop("Filter by service engine name"), false)
                .property("se_group_ref", string_prop("Filter by service engine group"), false)
                .property("fields", string_prop(FIELDS), false)
                .build(),
        )
        .read_only(),
        ToolDefinition::new(
            names::GET_SERVICE_ENGINE,
            "Get details of a specific service engine by UUID.",
            object_schema()
                .property("uuid", uuid_prop("service engine"), true)
                .property("fields", string_prop(FIELDS), false)
                .build(),
        )
        .read_only(),
        // Analytics
        ToolDefinition::new(
            names::GET_ANALYTICS,
            "Get metrics for a virtual service, pool or service engine.",
            object_schema()
                .property(
                    "resource_type",
                    enum_prop("Kind of resource", &["virtualservice", "pool", "serviceengine"]),
                    true,
                )
                .property("uuid", uuid_prop("resource"), true)
                .property("metric", string_prop("Metric id, e.g. l4_client.avg_bandwidth"), false)
                .property(
                    "time_range",
                    with_default(enum_prop("Time window", &["1h", "6h", "24h", "7d"]), json!("1h")),
                    false,
                )
                .build(),
        )
        .read_only(),
        // Fallback
        ToolDefinition::new(
            names::EXECUTE_GENERIC_OPERATION,
            "Execute an arbitrary controller API call when no specific tool fits. The endpoint is relative to /api.",
            object_schema()
                .property(
                    "method",
                    enum_prop("HTTP method", &["GET", "POST", "PUT", "DELETE", "PATCH"]),
                    true,
                )
                .property("endpoint", string_prop("API path, e.g. /virtualservice"), true)
                .property("body", free_object_prop("JSON request body"), false)
                .property("parameters", free_object_prop("Query parameters"), false)
                .build(),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_catalog_names() {
        let rendered = catalog()
            .iter()
            .map(|t| format!("{} {}", if t.read_only { "r" } else { "w" }, t.name))
            .collect::<Vec<_>>()
            .join("\n");
        insta::assert_snapshot!(rendered, @r"
        r list_virtual_services
        r get_virtual_service
        w create_virtual_service
        w update_virtual_service
        w delete_virtual_service
        r list_pools
        r get_pool
        w create_pool
        w update_pool
        w delete_pool
        w scale_out_pool
        w scale_in_pool
        r list_health_monitors
        r get_health_monitor
        r list_service_engines
        r get_service_engine
        r get_analytics
        w execute_generic_operation
        ");
    }

    #[test]
    fn test_names_unique() {
        let tools = catalog();
        let unique: HashSet<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(unique.len(), tools.len());
    }

    #[test]
    fn test_every_schema_is_an_object() {
        for tool in catalog() {
            assert_eq!(tool.parameters["type"], "object", "{}", tool.name);
            assert!(tool.parameters["properties"].is_object(), "{}", tool.name);
        }
    }
}
