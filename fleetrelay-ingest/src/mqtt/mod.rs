mod subscriber;
mod topic;

pub use subscriber::{handle_mqtt_message, MqttSubscriber};
pub use topic::{parse_topic, subscription_filters, DeviceTopic, TopicKind};
