//! Vehicle model and its stored document shape.

use serde::{Deserialize, Serialize};

use super::Fields;

/// Name of the store collection holding vehicle documents.
pub const VEHICLES_COLLECTION: &str = "Vehicles";

/// Document field holding the owner's user id.
pub const OWNER_FIELD: &str = "userID";

/// Owner recorded in a vehicle document, if any.
pub fn owner_of(fields: &Fields) -> Option<&str> {
    fields.get(OWNER_FIELD).and_then(|v| v.as_str())
}

/// A vehicle owned by one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vehicle {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub last_known_odometer: u64,
    pub in_use: bool,
}

/// Body of a vehicle document as persisted in the store. The id lives outside the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleDocument {
    pub name: String,
    #[serde(default)]
    pub last_known_odometer: u64,
    #[serde(default)]
    pub in_use: bool,
    #[serde(rename = "userID")]
    pub user_id: String,
}

impl VehicleDocument {
    /// A freshly added vehicle: odometer at zero, not in use.
    pub fn new(user_id: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            last_known_odometer: 0,
            in_use: false,
            user_id: user_id.to_string(),
        }
    }

    pub fn into_fields(self) -> Result<Fields, serde_json::Error> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => Ok(map),
            _ => Err(serde::ser::Error::custom(
                "vehicle document is not a JSON object",
            )),
        }
    }
}

impl Vehicle {
    /// Decode a stored document.
    pub fn from_document(id: &str, fields: &Fields) -> Result<Self, serde_json::Error> {
        let doc: VehicleDocument =
            serde_json::from_value(serde_json::Value::Object(fields.clone()))?;
        Ok(Self {
            id: id.to_string(),
            owner_id: doc.user_id,
            name: doc.name,
            last_known_odometer: doc.last_known_odometer,
            in_use: doc.in_use,
        })
    }
}

/// Fields overwritten by an update: name and odometer only.
pub fn update_fields(name: &str, last_known_odometer: u64) -> Fields {
    let mut fields = Fields::new();
    fields.insert("name".to_string(), name.into());
    fields.insert(
        "lastKnownOdometer".to_string(),
        last_known_odometer.into(),
    );
    fields
}

/// Request body for adding a vehicle.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVehicleRequest {
    pub name: String,
}

/// Request body for updating a vehicle.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateVehicleRequest {
    pub name: String,
    pub last_known_odometer: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_document_uses_client_field_names() {
        let fields = VehicleDocument::new("u1", "Civic").into_fields().unwrap();
        assert_eq!(
            serde_json::Value::Object(fields),
            json!({
                "name": "Civic",
                "lastKnownOdometer": 0,
                "inUse": false,
                "userID": "u1"
            })
        );
    }

    #[test]
    fn test_decode_document() {
        let fields = json!({
            "name": "Civic",
            "lastKnownOdometer": 1200,
            "inUse": true,
            "userID": "u1"
        });
        let vehicle = Vehicle::from_document("v1", fields.as_object().unwrap()).unwrap();
        assert_eq!(
            vehicle,
            Vehicle {
                id: "v1".to_string(),
                owner_id: "u1".to_string(),
                name: "Civic".to_string(),
                last_known_odometer: 1200,
                in_use: true,
            }
        );
    }

    #[test]
    fn test_decode_rejects_negative_odometer() {
        let fields = json!({ "name": "Civic", "lastKnownOdometer": -5, "userID": "u1" });
        assert!(Vehicle::from_document("v1", fields.as_object().unwrap()).is_err());
    }

    #[test]
    fn test_decode_requires_owner() {
        let fields = json!({ "name": "Orphan" });
        assert!(Vehicle::from_document("v1", fields.as_object().unwrap()).is_err());
    }

    #[test]
    fn test_update_fields_leave_owner_and_in_use_alone() {
        let fields = update_fields("Civic LX", 1200);
        assert_eq!(fields.len(), 2);
        assert_eq!(fields["name"], "Civic LX");
        assert_eq!(fields["lastKnownOdometer"], 1200);
    }

    #[test]
    fn test_owner_of_reads_user_field() {
        let fields = VehicleDocument::new("u1", "Civic").into_fields().unwrap();
        assert_eq!(owner_of(&fields), Some("u1"));
        assert_eq!(owner_of(&Fields::new()), None);
    }

    #[test]
    fn test_vehicle_serializes_camel_case() {
        let vehicle = Vehicle {
            id: "v1".to_string(),
            owner_id: "u1".to_string(),
            name: "Civic".to_string(),
            last_known_odometer: 0,
            in_use: false,
        };
        let json = serde_json::to_value(&vehicle).unwrap();
        assert_eq!(json["ownerId"], "u1");
        assert_eq!(json["lastKnownOdometer"], 0);
        assert_eq!(json["inUse"], false);
    }
}
