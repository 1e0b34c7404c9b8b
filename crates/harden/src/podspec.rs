//! 워크로드 pod spec 접근자
//!
//! 워크로드 종류별로 pod spec 위치가 다릅니다.
//! CronJob은 `spec.jobTemplate.spec.template.spec`, 나머지 워크로드는
//! `spec.template.spec`입니다. 경로가 없거나 형식이 다르면 `None`을 반환하며
//! 에러로 취급하지 않습니다.

use serde_json::{Map, Value};

use chartguard_core::types::Resource;

/// pod 템플릿을 가진 워크로드 종류
pub const WORKLOAD_KINDS: &[&str] = &[
    "Deployment",
    "StatefulSet",
    "DaemonSet",
    "ReplicaSet",
    "Job",
    "CronJob",
];

const TEMPLATE_POD_SPEC: &[&str] = &["spec", "template", "spec"];
const CRONJOB_POD_SPEC: &[&str] = &["spec", "jobTemplate", "spec", "template", "spec"];

/// 워크로드 종류인지 확인합니다.
pub fn is_workload(kind: &str) -> bool {
    WORKLOAD_KINDS.contains(&kind)
}

/// 종류별 pod spec 경로를 반환합니다. 워크로드가 아니면 `None`.
pub fn pod_spec_path(kind: &str) -> Option<&'static [&'static str]> {
    match kind {
        "CronJob" => Some(CRONJOB_POD_SPEC),
        k if is_workload(k) => Some(TEMPLATE_POD_SPEC),
        _ => None,
    }
}

/// 점으로 구분된 pod spec 경로 (변경 기록용)
pub fn pod_spec_field_path(kind: &str) -> Option<String> {
    pod_spec_path(kind).map(|segments| segments.join("."))
}

/// pod spec을 읽기 전용으로 반환합니다.
pub fn pod_spec(resource: &Resource) -> Option<&Map<String, Value>> {
    let path = pod_spec_path(&resource.kind)?;
    let mut current = &resource.object;
    for segment in path {
        current = current.get(*segment)?;
    }
    current.as_object()
}

/// pod spec을 변경 가능하게 반환합니다.
pub fn pod_spec_mut(resource: &mut Resource) -> Option<&mut Map<String, Value>> {
    let path = pod_spec_path(&resource.kind)?;
    let mut current = &mut resource.object;
    for segment in path {
        current = current.get_mut(*segment)?;
    }
    current.as_object_mut()
}

/// 컨테이너 목록 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerList {
    /// `containers`
    Containers,
    /// `initContainers`
    InitContainers,
}

impl ContainerList {
    /// 검사 순서 (일반 컨테이너 먼저)
    pub const ALL: [ContainerList; 2] = [ContainerList::Containers, ContainerList::InitContainers];

    /// pod spec 상의 필드 이름
    pub fn field(&self) -> &'static str {
        match self {
            Self::Containers => "containers",
            Self::InitContainers => "initContainers",
        }
    }
}

/// 컨테이너 위치 정보
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSlot {
    /// 소속 목록
    pub list: ContainerList,
    /// 목록 내 인덱스
    pub index: usize,
    /// 컨테이너 이름 (없으면 `<unnamed>`)
    pub name: String,
}

impl ContainerSlot {
    /// pod spec 기준 필드 경로 (예: `containers[0]`)
    pub fn field_path(&self) -> String {
        format!("{}[{}]", self.list.field(), self.index)
    }
}

/// 컨테이너 이름을 반환합니다.
pub fn container_name(container: &Map<String, Value>) -> &str {
    container
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("<unnamed>")
}

/// 모든 컨테이너/초기화 컨테이너를 순서대로 반환합니다.
///
/// 객체가 아닌 항목은 건너뜁니다.
pub fn containers(pod: &Map<String, Value>) -> Vec<(ContainerSlot, &Map<String, Value>)> {
    let mut out = Vec::new();
    for list in ContainerList::ALL {
        let Some(items) = pod.get(list.field()).and_then(Value::as_array) else {
            continue;
        };
        for (index, item) in items.iter().enumerate() {
            if let Some(container) = item.as_object() {
                let slot = ContainerSlot {
                    list,
                    index,
                    name: container_name(container).to_owned(),
                };
                out.push((slot, container));
            }
        }
    }
    out
}

/// 모든 컨테이너/초기화 컨테이너를 변경 가능하게 반환합니다.
pub fn containers_mut(
    pod: &mut Map<String, Value>,
) -> Vec<(ContainerSlot, &mut Map<String, Value>)> {
    let mut out = Vec::new();
    let mut regular = None;
    let mut init = None;
    for (key, value) in pod.iter_mut() {
        match key.as_str() {
            "containers" => regular = value.as_array_mut(),
            "initContainers" => init = value.as_array_mut(),
            _ => {}
        }
    }

    for (list, items) in [
        (ContainerList::Containers, regular),
        (ContainerList::InitContainers, init),
    ] {
        let Some(items) = items else {
            continue;
        };
        for (index, item) in items.iter_mut().enumerate() {
            if let Some(container) = item.as_object_mut() {
                let slot = ContainerSlot {
                    list,
                    index,
                    name: container_name(container).to_owned(),
                };
                out.push((slot, container));
            }
        }
    }
    out
}

/// 하위 객체를 반환하고, 없거나 `null`이면 빈 객체를 만들어 넣습니다.
///
/// 키가 있지만 객체도 `null`도 아니면 형식 오류로 보고 `None`을 반환합니다.
pub fn child_object_mut<'a>(
    parent: &'a mut Map<String, Value>,
    key: &str,
) -> Option<&'a mut Map<String, Value>> {
    let child = parent
        .entry(key.to_owned())
        .or_insert_with(|| Value::Object(Map::new()));
    if child.is_null() {
        *child = Value::Object(Map::new());
    }
    child.as_object_mut()
}

/// 중첩 경로의 값을 읽습니다.
pub fn lookup<'a>(object: &'a Map<String, Value>, path: &[&str]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    let mut current = object.get(*first)?;
    for segment in rest {
        current = current.get(*segment)?;
    }
    Some(current)
}
