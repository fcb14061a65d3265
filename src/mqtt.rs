//! MQTT glue: `mqtt_listen`/`mqtt_connect` share the regular accept/connect
//! path and simply tag the connection's protocol discriminator so the
//! dispatch loop routes its events as `MG_EV_MQTT_CMD`/`MG_EV_MQTT_MSG`/
//! `MG_EV_MQTT_OPEN` instead of the HTTP or raw path.
//!
//! The MQTT packet decoder itself is an external collaborator and is not
//! implemented here.

use crate::connection::Protocol;

pub fn protocol() -> Protocol {
    Protocol::Mqtt
}
