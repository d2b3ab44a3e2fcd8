use iomt_overlay::middleware::topics::{self, TopicAddress, TopicCategory};

#[test]
fn builds_every_topic_for_a_project() {
    assert_eq!(topics::online_topic("Hospital1").unwrap(), "PRECISE/OpenICElite/Hospital1/Online");
    assert_eq!(topics::client_base_topic("Hospital1").unwrap(), "PRECISE/OpenICElite/Hospital1/Client/#");
    assert_eq!(topics::client_topic("Hospital1", "viewer").unwrap(), "PRECISE/OpenICElite/Hospital1/Client/viewer");
    assert_eq!(topics::status_base_topic("Hospital1").unwrap(), "PRECISE/OpenICElite/Hospital1/Status/#");
    assert_eq!(topics::status_topic("Hospital1", "gw-1").unwrap(), "PRECISE/OpenICElite/Hospital1/Status/gw-1");
    assert_eq!(topics::data_base_topic("Hospital1").unwrap(), "PRECISE/OpenICElite/Hospital1/Data/#");
}

#[test]
fn data_topic_round_trips_through_parse() {
    let topic = topics::data_topic("Hospital1", "gw-1", "dev-9").unwrap();
    assert_eq!(topic, "PRECISE/OpenICElite/Hospital1/Data/gw-1/dev-9");

    assert_eq!(
        topics::parse(&topic),
        Some(TopicAddress {
            category: TopicCategory::Data,
            project: "Hospital1".to_string(),
            gateway_id: "gw-1".to_string(),
            device_id: Some("dev-9".to_string()),
        })
    );
}

#[test]
fn empty_parts_produce_no_topic() {
    assert!(topics::online_topic("").is_none());
    assert!(topics::status_topic("P", "").is_none());
    assert!(topics::data_topic("P", "gw", "").is_none());
    assert!(topics::client_topic("P", "").is_none());
}

#[test]
fn parse_accepts_topics_without_the_base() {
    let address = topics::parse("P/Status/gw-2/extra").unwrap();
    assert_eq!(address.category, TopicCategory::Status);
    assert_eq!(address.gateway_id, "gw-2");
    assert_eq!(address.device_id, None);
}

#[test]
fn parse_rejects_malformed_topics() {
    assert!(topics::parse("").is_none());
    assert!(topics::parse("PRECISE/OpenICElite/P/Data/gw").is_none());
    assert!(topics::parse("PRECISE/OpenICElite/P/Data/gw/").is_none());
    assert!(topics::parse("PRECISE/OpenICElite//Data/gw/dev").is_none());
    assert!(topics::parse("PRECISE/OpenICElite/P/Data//dev").is_none());
    assert!(topics::parse("PRECISE/OpenICElite/P/Bogus/gw/dev").is_none());
}

#[test]
fn category_names_match_the_wire() {
    assert_eq!(TopicCategory::Online.to_string(), "Online");
    assert_eq!(TopicCategory::Client.as_str(), "Client");
    assert_eq!(TopicCategory::Status.as_str(), "Status");
    assert_eq!(TopicCategory::Data.as_str(), "Data");
}

#[test]
fn garbage_parses_to_no_address() {
    assert!(topics::parse("not-a-real-topic").is_none());
    assert!(topics::parse("///").is_none());
}
