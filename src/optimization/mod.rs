pub mod balancer;
pub mod efficiency;
