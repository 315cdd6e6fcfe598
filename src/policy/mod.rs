//! Nodegroup visibility policy.

pub mod permissions;
pub mod predicate;

pub use permissions::{
    prune_graph, ModelPolicy, NodegroupPolicy, NodegroupRule, PermissionGate, PermissionPolicy,
    PermittedNodegroups,
};
pub use predicate::{
    CollectionMembership, CollectionMembershipProvider, NodegroupPredicate, PredicateProvider,
};
