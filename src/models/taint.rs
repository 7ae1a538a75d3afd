use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaintKey {
    NodeNotReady,
    NodeUnreachable,
    NodeUnschedulable,
    NodeDiskPressure,
    NodeMemoryPressure,
    NodePidPressure,
    NodeNetworkUnavailable,
    Custom(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaintEffect {
    NoSchedule,
    PreferNoSchedule,
    NoExecute,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Taint {
    pub key: TaintKey,
    pub effect: TaintEffect,
    pub value: String,
}

impl Taint {
    pub fn new(key: TaintKey, effect: TaintEffect) -> Self {
        Self {
            key,
            effect,
            value: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TolerationOperator {
    Exists,
    Equal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Toleration {
    pub key: Option<TaintKey>,
    pub operator: TolerationOperator,
    pub value: String,
    pub effect: Option<TaintEffect>,
}

impl Toleration {
    pub fn tolerate(&self, taint: &Taint) -> bool {
        if let Some(effect) = &self.effect {
            if effect != &taint.effect {
                return false;
            }
        }
        match &self.key {
            Some(key) if key != &taint.key => false,
            _ => match self.operator {
                TolerationOperator::Exists => true,
                TolerationOperator::Equal => self.value == taint.value,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exists_operator_ignores_value() {
        let toleration = Toleration {
            key: Some(TaintKey::NodeNotReady),
            operator: TolerationOperator::Exists,
            value: String::new(),
            effect: Some(TaintEffect::NoSchedule),
        };
        let taint = Taint {
            key: TaintKey::NodeNotReady,
            effect: TaintEffect::NoSchedule,
            value: "anything".to_string(),
        };
        assert!(toleration.tolerate(&taint));
    }

    #[test]
    fn equal_operator_requires_matching_value() {
        let toleration = Toleration {
            key: Some(TaintKey::NodeNotReady),
            operator: TolerationOperator::Equal,
            value: "a".to_string(),
            effect: None,
        };
        let mut taint = Taint {
            key: TaintKey::NodeNotReady,
            effect: TaintEffect::NoExecute,
            value: "a".to_string(),
        };
        assert!(toleration.tolerate(&taint));
        taint.value = "b".to_string();
        assert!(!toleration.tolerate(&taint));
    }

    #[test]
    fn wildcard_key_tolerates_any_taint_with_matching_effect() {
        let toleration = Toleration {
            key: None,
            operator: TolerationOperator::Exists,
            value: String::new(),
            effect: Some(TaintEffect::NoSchedule),
        };
        assert!(toleration.tolerate(&Taint::new(TaintKey::NodeUnschedulable, TaintEffect::NoSchedule)));
        assert!(!toleration.tolerate(&Taint::new(TaintKey::NodeUnschedulable, TaintEffect::NoExecute)));
    }
}
