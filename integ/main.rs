mod election;
mod replication;
mod support;
