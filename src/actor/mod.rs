//! The replica's exclusive-access region. `ReplicaActor` owns all replica state and handles one
//! event at a time; everything else talks to it through `ActorClient`/`WeakActorClient`.

mod client;
mod kill_switch;
mod replica_actor;

pub(crate) use client::ActorClient;
pub(crate) use client::WeakActorClient;
pub(crate) use kill_switch::KillSwitch;
#[cfg(test)]
pub(crate) use replica_actor::Event;
pub(crate) use replica_actor::ReplicaActor;
