use zookeeper_client as zk;

use super::zk::map_zk_error;
use crate::Error;

#[test]
fn test_session_failures_are_connection_level() {
    for e in [
        zk::Error::ConnectionLoss,
        zk::Error::SessionExpired,
        zk::Error::ClientClosed,
    ] {
        let err = map_zk_error("/service/billing", e);

        assert!(err.is_connection_level(), "{err:?}");
        assert!(!err.is_not_found());
    }
}

#[test]
fn test_missing_node_is_not_found() {
    let err = map_zk_error("/service/billing", zk::Error::NoNode);

    assert!(err.is_not_found());
    assert!(matches!(err, Error::NotFound(p) if p == "/service/billing"));
}

#[test]
fn test_other_failures_are_backend_errors() {
    let err = map_zk_error("/service/billing", zk::Error::NodeExists);

    assert!(!err.is_connection_level());
    assert!(matches!(err, Error::Backend(_)));
}
